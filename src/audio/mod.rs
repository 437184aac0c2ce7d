//! Audio pipeline
//!
//! Capture, playback, sample-rate conversion, and voice segmentation.
//! The session state machine routes between capture and playback; nothing
//! here knows about the socket.

pub mod capture;
pub mod playback;
pub mod resample;
pub mod vad;

pub use capture::{AudioCapture, SEND_INTERVAL, samples_to_wav};
pub use playback::{
    AudioSegment, AudioSink, CpalSink, PlaybackHandle, PlaybackQueue, PlaybackScheduler,
};
pub use resample::{
    TARGET_SAMPLE_RATE, decode_chunk, encode_chunk, f32_to_pcm16, pcm16_to_f32, resample_linear,
};
pub use vad::{SegmenterState, VadConfig, VadEvent, VoiceSegmenter, rms};
