//! Shared test utilities

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use coachlink::Result;
use coachlink::audio::{AudioSink, encode_chunk};

/// Encode `len` zero samples as a base64 PCM16 chunk
///
/// Decoded length identifies the segment, so tests can assert ordering.
#[must_use]
#[allow(dead_code)]
pub fn chunk_of_len(len: usize) -> String {
    encode_chunk(&vec![0i16; len])
}

/// Sink that records the decoded length of every segment it plays
///
/// The first `block` plays park until the stop flag force-halts them,
/// mimicking a long segment on a real output device.
#[allow(dead_code)]
pub struct RecordingSink {
    pub played: Arc<Mutex<Vec<usize>>>,
    block_remaining: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::blocking(0)
    }

    /// A sink whose first `block` segments wait for a force-stop
    #[must_use]
    pub fn blocking(block: usize) -> Self {
        Self {
            played: Arc::new(Mutex::new(Vec::new())),
            block_remaining: Arc::new(AtomicUsize::new(block)),
        }
    }

    #[must_use]
    pub fn played(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.played)
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, samples: Vec<f32>, stop: Arc<AtomicBool>) -> Result<()> {
        self.played.lock().unwrap().push(samples.len());

        let blocked = self
            .block_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if blocked {
            while !stop.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses
#[allow(dead_code)]
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
