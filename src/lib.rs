//! Coachlink - real-time voice conversation client for AI coaching
//!
//! This library provides the core of a spoken conversation with a remote
//! AI coach:
//! - Microphone capture, resampled and chunked onto a persistent socket
//! - Gapless, strictly ordered playback of reply audio with instant
//!   interruption
//! - A session state machine covering connect/retry, stop, and save
//! - Voice activity segmentation as an alternative capture strategy
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Devices                          │
//! │        microphone          │          speaker         │
//! └───────────┬────────────────┴──────────────▲──────────┘
//!             │                               │
//! ┌───────────▼───────────┐       ┌───────────┴──────────┐
//! │    Capture Pipeline    │       │  Playback Scheduler  │
//! │  resample · chunk      │       │  decode · order      │
//! └───────────┬───────────┘       └───────────▲──────────┘
//!             │                               │
//! ┌───────────▼───────────────────────────────┴──────────┐
//! │              Session State Machine                    │
//! │   connect · retry · dispatch · stop · save · timer   │
//! └───────────────────────┬──────────────────────────────┘
//!                         │
//!              relay socket (JSON frames)
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Session, SessionOptions, SessionStatus, SessionSummary};
