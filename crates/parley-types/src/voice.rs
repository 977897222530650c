//! Per-agent voice settings.
//!
//! Each agent speaks with its own remote voice. The settings are forwarded
//! verbatim to the synthesis endpoint, which merges them over its own
//! defaults, so every field is optional.

use serde::{Deserialize, Serialize};

/// Voice configuration for one agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Remote voice identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

impl VoiceSettings {
    pub fn with_voice(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: Some(voice_id.into()),
            ..Self::default()
        }
    }
}
