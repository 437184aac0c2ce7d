//! Microphone capture pipeline
//!
//! Owns the cpal input device. Every device callback resamples the frame to
//! the relay rate and appends PCM16 samples to a rolling buffer; the
//! session's flush tick drains the buffer every 100 ms and either sends it
//! as a chunk or drops it, so the buffer never grows unbounded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::audio::resample::{TARGET_SAMPLE_RATE, f32_to_pcm16, resample_linear};
use crate::{Error, Result};

/// How often the capture buffer is flushed into a chunk
pub const SEND_INTERVAL: Duration = Duration::from_millis(100);

/// Captures audio from the default input device at the relay rate
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    source_rate: u32,
    buffer: Arc<Mutex<Vec<i16>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new capture instance
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no microphone is available or no mono
    /// input configuration can be negotiated.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host.default_input_device().ok_or_else(|| {
            Error::Device("no microphone available; check device permissions".to_string())
        })?;

        // Prefer capturing at the relay rate so the resampler is a no-op;
        // otherwise take any mono config at its top rate and downsample
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(format!("microphone access failed: {e}")))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(TARGET_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(TARGET_SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(TARGET_SAMPLE_RATE)))
            .or_else(|| {
                device
                    .supported_input_configs()
                    .ok()?
                    .find(|c| c.channels() == 1)
                    .map(cpal::SupportedStreamConfigRange::with_max_sample_rate)
            })
            .ok_or_else(|| Error::Device("no mono input config available".to_string()))?;

        let source_rate = supported_config.sample_rate().0;
        let config = supported_config.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            source_rate,
            target_rate = TARGET_SAMPLE_RATE,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            source_rate,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the input stream cannot be opened.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let source_rate = self.source_rate;

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let resampled = resample_linear(data, source_rate, TARGET_SAMPLE_RATE);
                    let pcm = f32_to_pcm16(&resampled);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&pcm);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Device(format!("microphone access failed: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Device(format!("microphone stream failed: {e}")))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Drain the PCM16 samples captured since the last call
    #[must_use]
    pub fn take_chunk(&self) -> Vec<i16> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// The device rate samples are captured at before resampling
    #[must_use]
    pub const fn source_rate(&self) -> u32 {
        self.source_rate
    }
}

/// Encode f32 samples as a mono PCM16 WAV file in memory
///
/// # Errors
///
/// Returns [`Error::Audio`] if WAV encoding fails.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for sample in f32_to_pcm16(samples) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
