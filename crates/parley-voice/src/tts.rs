use crate::config::SpeakOptions;
use crate::error::VoiceError;
use crate::output::{AudioPlayer, SpeechEngine};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for TTS process execution.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for playing one remotely synthesized clip.
const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Words per minute espeak-ng uses at rate `1.0`.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Local speech engine that shells out to an espeak-compatible binary which
/// plays audio directly.
///
/// The child process is killed when the `speak` future is dropped, which is
/// how [`SpeechOutputController::stop`](crate::SpeechOutputController::stop)
/// interrupts it.
#[derive(Debug, Clone)]
pub struct CommandSpeechEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for CommandSpeechEngine {
    fn default() -> Self {
        Self::new("espeak-ng")
    }
}

impl CommandSpeechEngine {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            timeout: TTS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the engine arguments for `text` (exposed for testing).
    pub fn args(text: &str, options: &SpeakOptions) -> Vec<String> {
        let speed = (BASE_WORDS_PER_MINUTE * options.rate).round() as i32;
        let pitch = (50.0 * options.pitch).round().clamp(0.0, 99.0) as i32;
        let amplitude = (100.0 * options.volume).round().clamp(0.0, 200.0) as i32;

        let mut args = vec![
            "-s".to_string(),
            speed.to_string(),
            "-p".to_string(),
            pitch.to_string(),
            "-a".to_string(),
            amplitude.to_string(),
        ];
        if let Some(voice) = &options.voice {
            args.push("-v".to_string());
            args.push(voice.clone());
        }
        // Text that starts with '-' must not be read as a flag.
        args.push("--".to_string());
        args.push(text.to_string());
        args
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeechEngine {
    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.binary);
        command
            .args(Self::args(text, options))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            VoiceError::Tts(format!("Failed to spawn {:?}: {}", self.binary, e))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for TTS process: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("TTS process failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

/// Plays audio by URL or path through an external player command.
///
/// The audio reference is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandAudioPlayer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for CommandAudioPlayer {
    fn default() -> Self {
        Self::new(
            "ffplay",
            ["-nodisp", "-autoexit", "-loglevel", "error"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl CommandAudioPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: PLAYBACK_TIMEOUT,
        }
    }

    /// Parses a whitespace-separated command line such as
    /// `"mpv --no-video --really-quiet"`.
    pub fn from_command_line(line: &str) -> Result<Self, VoiceError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| VoiceError::Config("player command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AudioPlayer for CommandAudioPlayer {
    async fn play(&self, audio_ref: &str) -> Result<(), VoiceError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(audio_ref)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            VoiceError::Playback(format!("Failed to spawn {}: {}", self.program, e))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Playback(format!(
                    "playback timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Playback(format!("Failed to wait for player: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Playback(format!(
                "{} failed: {}",
                self.program,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
