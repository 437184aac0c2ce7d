//! Conversation timing
//!
//! Measures connected wall-clock time for the save payload. Built on
//! `tokio::time::Instant` so paused-clock tests can drive it.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks elapsed connected time across start/stop cycles
#[derive(Debug, Default)]
pub struct SessionTimer {
    started_at: Option<Instant>,
    accumulated: Duration,
}

impl SessionTimer {
    /// Start (or resume) the timer; a no-op while already running
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Stop the timer, folding the running span into the total
    pub fn stop(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Total connected time so far
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let running = self.started_at.map_or(Duration::ZERO, |t| t.elapsed());
        self.accumulated + running
    }

    /// Whole elapsed seconds
    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Elapsed time in minutes, as the save payload reports it
    #[must_use]
    pub fn duration_minutes(&self) -> f64 {
        self.elapsed().as_secs_f64() / 60.0
    }

    /// Whether the timer is currently running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.started_at.is_some()
    }
}
