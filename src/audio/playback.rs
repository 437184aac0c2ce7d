//! Ordered, gapless playback of response audio
//!
//! Reply chunks arrive tagged with the response they belong to and must
//! play strictly in arrival order with no gaps. A response change flushes
//! everything queued under the old id before the new audio is admitted;
//! cancellation additionally force-stops the segment already playing.
//!
//! The output device sits behind [`AudioSink`] so the scheduler can be
//! exercised without audio hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::Notify;

use crate::audio::resample::{TARGET_SAMPLE_RATE, decode_chunk};
use crate::{Error, Result};

/// One response audio chunk awaiting playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    /// Base64 PCM16 mono payload as received from the relay
    pub audio: String,

    /// Response this segment belongs to; `None` attaches to the current one
    pub response_id: Option<String>,
}

/// FIFO of pending segments plus the response-id bookkeeping
///
/// Invariant: everything queued belongs to `current_response_id`; a chunk
/// carrying a different id flushes the queue before being admitted, so a
/// segment of a stale response can never begin playing.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    segments: VecDeque<AudioSegment>,
    current_response_id: Option<String>,
    should_stop: bool,
}

impl PlaybackQueue {
    /// Admit a segment, handling response-id adoption
    ///
    /// A non-null id that differs from the current one flushes the queue,
    /// adopts the new id, and clears the stop flag. Segments are dropped
    /// while the stop flag is set.
    pub fn push(&mut self, segment: AudioSegment) {
        if let Some(id) = &segment.response_id {
            if self.current_response_id.as_deref() != Some(id) {
                self.segments.clear();
                self.current_response_id = Some(id.clone());
                self.should_stop = false;
            }
        }

        if self.should_stop {
            return;
        }

        self.segments.push_back(segment);
    }

    /// Flush playback for `response_id`, or unconditionally when `None`
    ///
    /// Returns whether the cancellation applied. The stop flag stays set
    /// until a segment with a fresh response id arrives.
    pub fn cancel(&mut self, response_id: Option<&str>) -> bool {
        let applies = match response_id {
            Some(id) => self.current_response_id.as_deref() == Some(id),
            None => true,
        };

        if applies {
            self.segments.clear();
            self.current_response_id = None;
            self.should_stop = true;
        }

        applies
    }

    /// Take the next segment, unless the stop flag is set
    pub fn pop(&mut self) -> Option<AudioSegment> {
        if self.should_stop {
            return None;
        }

        self.segments.pop_front()
    }

    /// Number of segments waiting to play
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the queue holds no segments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Id of the response currently being played
    #[must_use]
    pub fn current_response_id(&self) -> Option<&str> {
        self.current_response_id.as_deref()
    }

    /// Whether a stop is pending
    #[must_use]
    pub const fn stop_requested(&self) -> bool {
        self.should_stop
    }
}

/// Output device seam
///
/// `play` schedules one decoded segment and resolves when the audio has
/// either played to its natural end or been force-stopped via `stop`.
#[async_trait]
pub trait AudioSink: Send {
    /// Play one segment to completion or force-stop
    ///
    /// # Errors
    ///
    /// Returns an error if the output device rejects the segment.
    async fn play(&mut self, samples: Vec<f32>, stop: Arc<AtomicBool>) -> Result<()>;
}

/// Plays decoded segments on the default cpal output device
pub struct CpalSink {
    config: StreamConfig,
}

impl CpalSink {
    /// Create a sink on the default output device
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no output device or no usable config is
    /// available.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Device(format!("speaker access failed: {e}")))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(TARGET_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(TARGET_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: stereo, duplicating the mono signal
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(TARGET_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(TARGET_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(TARGET_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = TARGET_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&mut self, samples: Vec<f32>, stop: Arc<AtomicBool>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let config = self.config.clone();

        // The cpal stream is not Send, so the whole play-and-wait sequence
        // runs on a blocking thread; the stop flag is polled there
        tokio::task::spawn_blocking(move || play_blocking(&config, samples, &stop))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Drive one segment through an output stream, polling for completion or
/// force-stop
fn play_blocking(config: &StreamConfig, samples: Vec<f32>, stop: &AtomicBool) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("no output device".to_string()))?;

    let channels = config.channels as usize;
    let sample_count = samples.len();

    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(AtomicBool::new(false));

    let samples = Arc::new(samples);
    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position_cb.lock().unwrap();

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples_cb.len() {
                        let s = samples_cb[*pos];
                        *pos += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::Release);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Device(format!("speaker access failed: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::Device(format!("speaker stream failed: {e}")))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(TARGET_SAMPLE_RATE);
    let deadline = std::time::Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) {
        if stop.load(Ordering::Acquire) {
            tracing::debug!("playback force-stopped");
            break;
        }
        if std::time::Instant::now() > deadline {
            tracing::warn!(sample_count, "playback did not signal completion in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    drop(stream);
    Ok(())
}

/// Shared handle for feeding and cancelling the playback scheduler
#[derive(Clone)]
pub struct PlaybackHandle {
    queue: Arc<Mutex<PlaybackQueue>>,
    notify: Arc<Notify>,
    /// Force-halts the segment currently on the sink
    stop_audio: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Enqueue a reply chunk for ordered playback
    pub fn enqueue(&self, segment: AudioSegment) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(segment);
            // A fresh response clears any pending force-stop
            if !queue.stop_requested() {
                self.stop_audio.store(false, Ordering::Release);
            }
        }
        self.notify.notify_one();
    }

    /// Cancel playback for `response_id`, or everything when `None`
    ///
    /// Halts the in-flight segment and discards the queue; nothing queued
    /// under the cancelled response will start.
    pub fn cancel(&self, response_id: Option<&str>) {
        let applied = self
            .queue
            .lock()
            .map(|mut queue| queue.cancel(response_id))
            .unwrap_or(false);
        if applied {
            self.stop_audio.store(true, Ordering::Release);
            self.notify.notify_one();
            tracing::debug!(response_id, "playback cancelled");
        }
    }

    /// Id of the response currently adopted by the queue
    #[must_use]
    pub fn current_response_id(&self) -> Option<String> {
        self.queue
            .lock()
            .ok()
            .and_then(|queue| queue.current_response_id().map(ToString::to_string))
    }

    /// Number of segments waiting to play
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or_default()
    }

    /// Stop the scheduler task; used during session teardown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.stop_audio.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Single consumer loop draining the queue onto a sink
pub struct PlaybackScheduler {
    queue: Arc<Mutex<PlaybackQueue>>,
    notify: Arc<Notify>,
    stop_audio: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
}

impl PlaybackScheduler {
    /// Create a scheduler and its feeding handle
    ///
    /// `playing` is raised while a segment is on the sink; `stop_audio`
    /// force-halts the in-flight segment. Both are shared with the session
    /// so every component consults the same flags.
    #[must_use]
    pub fn new(playing: Arc<AtomicBool>, stop_audio: Arc<AtomicBool>) -> (Self, PlaybackHandle) {
        let queue = Arc::new(Mutex::new(PlaybackQueue::default()));
        let notify = Arc::new(Notify::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = PlaybackHandle {
            queue: Arc::clone(&queue),
            notify: Arc::clone(&notify),
            stop_audio: Arc::clone(&stop_audio),
            shutdown: Arc::clone(&shutdown),
        };

        (
            Self {
                queue,
                notify,
                stop_audio,
                shutdown,
                playing,
            },
            handle,
        )
    }

    /// Drain segments onto the sink until shutdown
    ///
    /// Strictly ordered and gapless: the next segment is dequeued only
    /// after the previous one resolves. Decode failures skip the segment
    /// and keep the loop alive.
    pub async fn run(self, mut sink: impl AudioSink) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let segment = self.queue.lock().ok().and_then(|mut queue| queue.pop());
            let Some(segment) = segment else {
                self.notify.notified().await;
                continue;
            };

            match decode_chunk(&segment.audio) {
                Ok(samples) => {
                    self.playing.store(true, Ordering::Release);
                    let result = sink.play(samples, Arc::clone(&self.stop_audio)).await;
                    self.playing.store(false, Ordering::Release);

                    if let Err(e) = result {
                        tracing::error!(error = %e, "segment playback failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable segment");
                }
            }
        }

        tracing::debug!("playback scheduler stopped");
    }
}
