//! REST client for the backend's voice endpoints.

use crate::config::ApiConfig;
use crate::error::VoiceError;
use crate::synthesis::{RemoteSynthesizer, SynthesisRequest, SynthesisResult};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Supplies the bearer token for backend requests.
pub trait CredentialSource: Send + Sync {
    /// Returns `None` when no credential is available; requests are then
    /// sent without an `Authorization` header.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, or none.
#[derive(Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = if self.0.is_some() { "[REDACTED]" } else { "none" };
        f.debug_tuple("StaticCredential").field(&token).finish()
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio_data: String,
    format: &'a str,
    language: &'a str,
}

/// Result of a server-side transcription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    /// Audio length in seconds.
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Clone)]
pub struct VoiceApiClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for VoiceApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl VoiceApiClient {
    pub fn new(config: &ApiConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self, VoiceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| VoiceError::Config(format!("invalid base URL {:?}: {}", config.base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(VoiceError::Config(format!(
                "base URL must be http or https, got {}",
                base_url.scheme()
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Uploads recorded audio for transcription.
    pub async fn transcribe(
        &self,
        audio: &[u8],
        format: &str,
        language: &str,
    ) -> Result<Transcription, VoiceError> {
        let body = TranscribeRequest {
            audio_data: base64::engine::general_purpose::STANDARD.encode(audio),
            format,
            language,
        };
        let response = self.post("/api/voice/transcribe", &body).await?;
        Ok(response.json().await?)
    }

    /// Requests agent-specific synthesis. A relative `audio_url` in the
    /// response is resolved against the base URL.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError> {
        let response = self.post("/api/voice/synthesize", request).await?;
        let mut result: SynthesisResult = response.json().await?;
        if let Some(audio_url) = result.audio_url.take() {
            result.audio_url = Some(self.resolve(&audio_url)?);
        }
        Ok(result)
    }

    fn resolve(&self, reference: &str) -> Result<String, VoiceError> {
        if reference.trim().is_empty() {
            return Ok(String::new());
        }
        self.base_url
            .join(reference)
            .map(String::from)
            .map_err(|e| VoiceError::Synthesis(format!("invalid audio URL {:?}: {}", reference, e)))
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, VoiceError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| VoiceError::Config(format!("invalid endpoint {}: {}", path, e)))?;

        let mut request = self.http.post(url).json(body);
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.detail)
            .unwrap_or(text);
        tracing::warn!(path = %path, status = status.as_u16(), "voice API request failed");
        Err(VoiceError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteSynthesizer for VoiceApiClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError> {
        VoiceApiClient::synthesize(self, request).await
    }
}
