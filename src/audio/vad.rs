//! Voice activity segmentation
//!
//! Turns a live volume signal into discrete utterances. Hysteresis on both
//! edges: sustained volume is required before a recording starts, and
//! sustained silence before it ends, so single noisy ticks never open or
//! close a segment.
//!
//! An alternative capture strategy to continuous streaming; the `record`
//! CLI command drives it against the microphone.

use std::time::{Duration, Instant};

/// Segmenter tuning parameters
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized volume (0-1) above which a tick counts as speech
    pub volume_threshold: f32,

    /// Consecutive speech ticks required before a recording starts
    pub min_speech_ticks: u32,

    /// Recordings with less speech than this are discarded as noise
    pub min_utterance: Duration,

    /// Silence that ends a recording
    pub silence_to_end: Duration,

    /// Nominal spacing between volume ticks
    pub tick_interval: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 0.06,
            min_speech_ticks: 3,
            min_utterance: Duration::from_millis(300),
            silence_to_end: Duration::from_millis(800),
            tick_interval: Duration::from_millis(30),
        }
    }
}

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech
    Silent,
    /// Volume above threshold, counting ticks before recording starts
    Armed,
    /// Buffering an utterance
    Recording,
}

/// Events emitted by the segmenter
#[derive(Debug, PartialEq)]
pub enum VadEvent {
    /// Sustained speech detected, recording started
    SpeechStart,
    /// A complete utterance, samples in capture order
    Utterance(Vec<f32>),
}

/// Segments continuous capture into utterances by volume hysteresis
pub struct VoiceSegmenter {
    config: VadConfig,
    state: SegmenterState,
    speech_ticks: u32,
    last_voice_at: Option<Instant>,
    recording_started_at: Option<Instant>,
    buffer: Vec<f32>,
}

impl VoiceSegmenter {
    /// Create a segmenter with the given parameters
    #[must_use]
    pub const fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Silent,
            speech_ticks: 0,
            last_voice_at: None,
            recording_started_at: None,
            buffer: Vec::new(),
        }
    }

    /// Feed one volume tick and its audio samples
    ///
    /// `volume` is the normalized average level for this tick, `samples`
    /// the audio captured since the previous tick, and `now` the tick
    /// timestamp. Returns an event when a recording starts or an utterance
    /// completes.
    pub fn process_tick(
        &mut self,
        volume: f32,
        samples: &[f32],
        now: Instant,
    ) -> Option<VadEvent> {
        let above = volume > self.config.volume_threshold;

        match self.state {
            SegmenterState::Silent => {
                if above {
                    self.state = SegmenterState::Armed;
                    self.speech_ticks = 1;
                    self.last_voice_at = Some(now);
                    return self.maybe_start_recording(samples, now);
                }
                None
            }
            SegmenterState::Armed => {
                if above {
                    self.speech_ticks += 1;
                    self.last_voice_at = Some(now);
                    self.maybe_start_recording(samples, now)
                } else {
                    // A single quiet tick disarms; this is the noise filter
                    self.state = SegmenterState::Silent;
                    self.speech_ticks = 0;
                    None
                }
            }
            SegmenterState::Recording => {
                self.buffer.extend_from_slice(samples);

                if above {
                    self.last_voice_at = Some(now);
                    return None;
                }

                let silence = self
                    .last_voice_at
                    .map_or(Duration::ZERO, |t| now.duration_since(t));
                if silence >= self.config.silence_to_end {
                    return self.finish();
                }
                None
            }
        }
    }

    /// Flush the current recording immediately, regardless of duration
    ///
    /// Used for forced cutoffs. Returns the buffered utterance if one was
    /// in progress and non-empty.
    pub fn trigger_end(&mut self) -> Option<VadEvent> {
        if self.state != SegmenterState::Recording {
            return None;
        }

        self.state = SegmenterState::Silent;
        self.speech_ticks = 0;
        self.recording_started_at = None;

        let utterance = std::mem::take(&mut self.buffer);
        (!utterance.is_empty()).then_some(VadEvent::Utterance(utterance))
    }

    /// Discard the current buffer and restart recording without emitting
    pub fn reset_recording(&mut self, now: Instant) {
        if self.state == SegmenterState::Recording {
            self.buffer.clear();
            self.recording_started_at = Some(now);
            self.last_voice_at = Some(now);
        }
    }

    /// Current segmenter state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Whether an utterance is currently being buffered
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state == SegmenterState::Recording
    }

    fn maybe_start_recording(&mut self, samples: &[f32], now: Instant) -> Option<VadEvent> {
        if self.speech_ticks < self.config.min_speech_ticks {
            return None;
        }

        self.state = SegmenterState::Recording;
        self.recording_started_at = Some(now);
        self.buffer.clear();
        self.buffer.extend_from_slice(samples);
        Some(VadEvent::SpeechStart)
    }

    /// End the recording on silence, emitting the utterance if it carried
    /// enough speech
    fn finish(&mut self) -> Option<VadEvent> {
        self.state = SegmenterState::Silent;
        self.speech_ticks = 0;

        let started = self.recording_started_at.take();
        let utterance = std::mem::take(&mut self.buffer);

        // Duration counts speech only, from recording start to the last
        // voiced tick; the trailing silence does not qualify an utterance
        let spoke_for = match (started, self.last_voice_at) {
            (Some(start), Some(last)) => last.duration_since(start),
            _ => Duration::ZERO,
        };

        if spoke_for >= self.config.min_utterance && !utterance.is_empty() {
            Some(VadEvent::Utterance(utterance))
        } else {
            None
        }
    }
}

/// RMS level of a sample buffer, normalized to 0-1 for full-scale input
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(30);

    fn ticks(segmenter: &mut VoiceSegmenter, base: Instant, specs: &[(u32, f32)]) -> Vec<VadEvent> {
        let mut events = Vec::new();
        for &(i, volume) in specs {
            let now = base + TICK * i;
            if let Some(event) = segmenter.process_tick(volume, &[0.1; 720], now) {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn two_speech_ticks_never_start_recording() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        let events = ticks(&mut seg, base, &[(0, 0.5), (1, 0.5), (2, 0.01)]);

        assert!(events.is_empty());
        assert_eq!(seg.state(), SegmenterState::Silent);
    }

    #[test]
    fn third_consecutive_tick_starts_recording() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        let events = ticks(&mut seg, base, &[(0, 0.5), (1, 0.5), (2, 0.5)]);

        assert_eq!(events, vec![VadEvent::SpeechStart]);
        assert_eq!(seg.state(), SegmenterState::Recording);
    }

    #[test]
    fn quiet_tick_resets_the_arm_counter() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        // Two spikes, a dip, then two more spikes: never three in a row
        let events = ticks(
            &mut seg,
            base,
            &[(0, 0.5), (1, 0.5), (2, 0.01), (3, 0.5), (4, 0.5)],
        );

        assert!(events.is_empty());
        assert_ne!(seg.state(), SegmenterState::Recording);
    }

    #[test]
    fn short_recording_is_discarded() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        // Recording starts at tick 2; speech ends ~250 ms after it started
        let mut specs: Vec<(u32, f32)> = (0..11).map(|i| (i, 0.5)).collect();
        // Silence ticks out to well past the 800 ms cutoff
        specs.extend((11..45).map(|i| (i, 0.01)));

        let events = ticks(&mut seg, base, &specs);

        assert_eq!(events, vec![VadEvent::SpeechStart]);
        assert_eq!(seg.state(), SegmenterState::Silent);
    }

    #[test]
    fn sufficient_recording_emits_one_utterance() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        // Speech from tick 0 through ~420 ms (recording starts at tick 2,
        // so the voiced span is ~360 ms), then 900+ ms of silence
        let mut specs: Vec<(u32, f32)> = (0..15).map(|i| (i, 0.5)).collect();
        specs.extend((15..50).map(|i| (i, 0.01)));

        let events = ticks(&mut seg, base, &specs);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], VadEvent::SpeechStart);
        assert!(matches!(&events[1], VadEvent::Utterance(samples) if !samples.is_empty()));
        assert_eq!(seg.state(), SegmenterState::Silent);
    }

    #[test]
    fn silence_shorter_than_cutoff_keeps_recording() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        // Speech, a 600 ms dip, then speech again: still one recording
        let mut specs: Vec<(u32, f32)> = (0..10).map(|i| (i, 0.5)).collect();
        specs.extend((10..30).map(|i| (i, 0.01)));
        specs.extend((30..35).map(|i| (i, 0.5)));

        let events = ticks(&mut seg, base, &specs);

        assert_eq!(events, vec![VadEvent::SpeechStart]);
        assert_eq!(seg.state(), SegmenterState::Recording);
    }

    #[test]
    fn trigger_end_flushes_regardless_of_duration() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        ticks(&mut seg, base, &[(0, 0.5), (1, 0.5), (2, 0.5), (3, 0.5)]);
        assert!(seg.is_recording());

        let flushed = seg.trigger_end();
        assert!(matches!(flushed, Some(VadEvent::Utterance(samples)) if !samples.is_empty()));
        assert_eq!(seg.state(), SegmenterState::Silent);
    }

    #[test]
    fn reset_discards_without_emitting() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        ticks(&mut seg, base, &[(0, 0.5), (1, 0.5), (2, 0.5), (3, 0.5)]);
        assert!(seg.is_recording());

        seg.reset_recording(base + TICK * 4);
        assert!(seg.is_recording());

        // Flushing right after a reset yields nothing: the buffer is gone
        assert_eq!(seg.trigger_end(), None);
    }

    #[test]
    fn recording_can_rearm_after_an_utterance() {
        let mut seg = VoiceSegmenter::new(VadConfig::default());
        let base = Instant::now();

        let mut specs: Vec<(u32, f32)> = (0..15).map(|i| (i, 0.5)).collect();
        specs.extend((15..50).map(|i| (i, 0.01)));
        // Second burst after the first utterance completes
        specs.extend((50..55).map(|i| (i, 0.5)));

        let events = ticks(&mut seg, base, &specs);

        let starts = events
            .iter()
            .filter(|e| matches!(e, VadEvent::SpeechStart))
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn rms_levels() {
        assert!(rms(&[]).abs() < f32::EPSILON);
        assert!(rms(&vec![0.0; 64]) < 0.001);
        assert!(rms(&vec![0.5; 64]) > 0.4);
    }
}
