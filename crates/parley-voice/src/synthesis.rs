//! Agent-specific remote synthesis with local fallback.

use crate::config::SpeakOptions;
use crate::error::VoiceError;
use crate::output::{PlaybackOutcome, SpeechOutputController};
use async_trait::async_trait;
use parley_types::VoiceSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub agent_id: String,
    #[serde(default)]
    pub voice_settings: VoiceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// URL of the synthesized audio. Relative URLs are resolved against the
    /// backend origin by the client.
    #[serde(default)]
    pub audio_url: Option<String>,
    /// Clip length in seconds.
    #[serde(default, rename = "duration")]
    pub duration_secs: f64,
}

impl SynthesisResult {
    pub fn duration_ms(&self) -> u64 {
        (self.duration_secs.max(0.0) * 1000.0).round() as u64
    }
}

/// Capability: server-side synthesis with per-agent voices.
#[async_trait]
pub trait RemoteSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError>;
}

pub struct SynthesisFallbackChain {
    remote: Option<Arc<dyn RemoteSynthesizer>>,
    output: Arc<SpeechOutputController>,
    voices: HashMap<String, VoiceSettings>,
    local_options: SpeakOptions,
}

impl SynthesisFallbackChain {
    pub fn new(output: Arc<SpeechOutputController>) -> Self {
        Self {
            remote: None,
            output,
            voices: HashMap::new(),
            local_options: SpeakOptions::default(),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteSynthesizer>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Voice settings sent with each agent's synthesis requests.
    pub fn with_voices(mut self, voices: HashMap<String, VoiceSettings>) -> Self {
        self.voices = voices;
        self
    }

    pub fn with_local_options(mut self, options: SpeakOptions) -> Self {
        self.local_options = options;
        self
    }

    pub fn output(&self) -> &Arc<SpeechOutputController> {
        &self.output
    }

    /// Speaks `text` in `agent_id`'s voice, or with the local engine if the
    /// remote path fails at any step.
    pub async fn synthesize_for_agent(
        &self,
        text: &str,
        agent_id: &str,
    ) -> Result<PlaybackOutcome, VoiceError> {
        match self.try_remote(text, agent_id).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "remote synthesis failed, using local engine");
            }
        }
        self.output.speak(text, &self.local_options).await
    }

    async fn try_remote(&self, text: &str, agent_id: &str) -> Result<PlaybackOutcome, VoiceError> {
        let remote = self
            .remote
            .as_ref()
            .ok_or(VoiceError::Unsupported("remote synthesis"))?;

        let request = SynthesisRequest {
            text: text.to_string(),
            agent_id: agent_id.to_string(),
            voice_settings: self.voices.get(agent_id).cloned().unwrap_or_default(),
        };
        let result = remote.synthesize(&request).await?;

        let audio_url = result
            .audio_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| VoiceError::Synthesis("response has no audio URL".to_string()))?;

        tracing::debug!(agent_id = %agent_id, duration_ms = result.duration_ms(), "playing remote audio");
        self.output.play_audio(audio_url).await
    }
}
