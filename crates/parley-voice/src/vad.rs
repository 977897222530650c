//! Energy-based voice activity detection with a silence timeout.
//!
//! The detector never owns a timer. It keeps a single pending deadline that
//! the caller advances by feeding levels ([`VoiceActivityDetector::observe`])
//! or by polling the clock ([`VoiceActivityDetector::poll`]), so it can be
//! driven by a paused test clock as easily as by real audio.

use crate::config::VadConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Whether the most recent sample was above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Voice,
    Silence,
}

/// Transitions reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// The level rose above the threshold after a period of silence.
    VoiceDetected,
    /// The level stayed at or below the threshold for the whole silence
    /// duration. Fires once per uninterrupted silence run.
    SilenceTimeout,
}

#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    threshold: f32,
    silence_duration: Duration,
    state: VadState,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            threshold: config.threshold,
            silence_duration: config.silence_duration(),
            state: VadState::Silence,
            deadline: None,
            timed_out: false,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_voice(&self) -> bool {
        self.state == VadState::Voice
    }

    /// The instant at which the pending silence run times out, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feeds one level sample taken at `now`.
    pub fn observe(&mut self, level: f32, now: Instant) -> Option<VadEvent> {
        if level > self.threshold {
            self.deadline = None;
            self.timed_out = false;
            let was_silent = self.state == VadState::Silence;
            self.state = VadState::Voice;
            return was_silent.then_some(VadEvent::VoiceDetected);
        }

        self.state = VadState::Silence;
        if self.deadline.is_none() && !self.timed_out {
            self.deadline = Some(now + self.silence_duration);
        }
        self.poll(now)
    }

    /// Fires the silence timeout if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<VadEvent> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.timed_out = true;
                Some(VadEvent::SilenceTimeout)
            }
            _ => None,
        }
    }

    /// Clears the pending deadline and returns to the initial state.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.deadline = None;
        self.timed_out = false;
    }
}
