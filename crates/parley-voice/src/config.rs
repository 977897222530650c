use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_threshold() -> f32 {
    0.01
}

fn default_silence_duration_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_unit() -> f32 {
    1.0
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Tuning for the voice activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    /// RMS level above which a frame counts as voice.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// How long the level must stay at or below the threshold before the
    /// listening session is closed.
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

impl VadConfig {
    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }
}

/// Options for one listening session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenOptions {
    /// Keep recognizing after the first finalized utterance.
    #[serde(default = "default_true")]
    pub continuous: bool,
    /// Deliver partial transcripts as they are revised.
    #[serde(default = "default_true")]
    pub interim_results: bool,
    /// BCP 47 language tag passed to the recognizer.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: default_language(),
        }
    }
}

/// Options for local speech synthesis. `1.0` is the engine's normal value
/// for rate, pitch and volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakOptions {
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_unit")]
    pub rate: f32,
    #[serde(default = "default_unit")]
    pub pitch: f32,
    #[serde(default = "default_unit")]
    pub volume: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: default_unit(),
            pitch: default_unit(),
            volume: default_unit(),
        }
    }
}

impl SpeakOptions {
    /// Checks the values against the ranges speech engines accept.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if !(0.1..=10.0).contains(&self.rate) {
            return Err(VoiceError::Config(
                "Rate must be between 0.1 and 10.0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.pitch) {
            return Err(VoiceError::Config(
                "Pitch must be between 0.0 and 2.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(VoiceError::Config(
                "Volume must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Location of the backend's voice REST endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP(S) origin of the backend, e.g. `https://assistant.example.com`.
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
