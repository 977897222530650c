//! Client configuration loading from file and environment variables.

use crate::connection::ReconnectPolicy;
use parley_types::VoiceSettings;
use parley_voice::{ListenOptions, SpeakOptions, VadConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Backend location and credentials.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Voice activity detection.
    #[serde(default)]
    pub vad: VadConfig,

    /// Defaults for listening sessions.
    #[serde(default)]
    pub listen: ListenOptions,

    /// Local speech output.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Remote voice settings keyed by agent id.
    #[serde(default)]
    pub agents: HashMap<String, VoiceSettings>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the agent backend.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP(S) origin of the backend. The WebSocket URL is derived from it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Conversation to join. A random id is generated when empty.
    #[serde(default)]
    pub session_id: String,

    /// Bearer token for the WebSocket handshake and REST calls.
    #[serde(default)]
    pub token: Option<String>,

    /// Timeout for REST requests and the WebSocket handshake.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field("session_id", &self.session_id)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Local text-to-speech and playback commands.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    /// espeak-compatible synthesis binary.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Player command line; the audio URL is appended.
    #[serde(default = "default_player")]
    pub player: String,

    /// Read assistant replies aloud.
    #[serde(default = "default_true")]
    pub speak_replies: bool,

    /// Voice, rate, pitch and volume for the local engine.
    #[serde(default)]
    pub defaults: SpeakOptions,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_client=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_engine() -> String {
    "espeak-ng".to_string()
}

fn default_player() -> String {
    "ffplay -nodisp -autoexit -loglevel error".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            session_id: String::new(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            player: default_player(),
            speak_replies: true,
            defaults: SpeakOptions::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_BASE_URL` overrides `server.base_url`
/// - `PARLEY_SESSION_ID` overrides `server.session_id`
/// - `PARLEY_TOKEN` overrides `server.token`
/// - `PARLEY_MAX_RECONNECT_ATTEMPTS` overrides `reconnect.max_attempts`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(base_url) = env("PARLEY_BASE_URL") {
        config.server.base_url = base_url;
    }
    if let Some(session_id) = env("PARLEY_SESSION_ID") {
        config.server.session_id = session_id;
    }
    if let Some(token) = env("PARLEY_TOKEN") {
        config.server.token = Some(token).filter(|t| !t.is_empty());
    }
    if let Some(attempts) = env("PARLEY_MAX_RECONNECT_ATTEMPTS") {
        if let Ok(parsed) = attempts.parse() {
            config.reconnect.max_attempts = parsed;
        }
    }
    if let Some(level) = env("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_config_with(Some("/nonexistent/parley.toml"), no_env).unwrap();
        assert_eq!(config.server.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.vad.silence_duration_ms, 3000);
        assert!(config.listen.continuous);
        assert!(config.speech.speak_replies);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_values_and_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
base_url = "https://assistant.example.com"
session_id = "s1"
token = "from-file"

[reconnect]
max_attempts = 3
base_delay_ms = 500

[vad]
silence_duration_ms = 1500

[listen]
language = "de-DE"
continuous = false

[speech]
player = "mpv --no-video"

[speech.defaults]
rate = 1.5

[agents.carol]
voice_id = "EXAVITQu4vr4xnSDxMaL"
stability = 0.4
"#
        )
        .unwrap();

        let env = |key: &str| match key {
            "PARLEY_TOKEN" => Some("from-env".to_string()),
            "PARLEY_MAX_RECONNECT_ATTEMPTS" => Some("7".to_string()),
            "PARLEY_LOG_JSON" => Some("1".to_string()),
            _ => None,
        };
        let config = load_config_with(file.path().to_str(), env).unwrap();

        assert_eq!(config.server.base_url, "https://assistant.example.com");
        assert_eq!(config.server.session_id, "s1");
        assert_eq!(config.server.token.as_deref(), Some("from-env"));
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.reconnect.base_delay_ms, 500);
        assert_eq!(config.reconnect.multiplier, 2);
        assert_eq!(config.vad.silence_duration_ms, 1500);
        assert_eq!(config.vad.threshold, 0.01);
        assert_eq!(config.listen.language, "de-DE");
        assert!(!config.listen.continuous);
        assert_eq!(config.speech.player, "mpv --no-video");
        assert_eq!(config.speech.engine, "espeak-ng");
        assert_eq!(config.speech.defaults.rate, 1.5);
        assert_eq!(
            config.agents["carol"].voice_id.as_deref(),
            Some("EXAVITQu4vr4xnSDxMaL")
        );
        assert!(config.logging.json);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nbase_url = ").unwrap();
        assert!(matches!(
            load_config_with(file.path().to_str(), no_env),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn debug_output_redacts_token() {
        let server = ServerConfig {
            token: Some("super-secret".to_string()),
            ..ServerConfig::default()
        };
        let rendered = format!("{:?}", server);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
