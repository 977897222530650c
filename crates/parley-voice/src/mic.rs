//! Microphone capture through an external recorder process.

use crate::capture::{AudioStream, Microphone};
use crate::error::VoiceError;
use crate::level::AudioFrame;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Samples per frame handed to the level meter.
const FRAME_SAMPLES: usize = 1024;

/// Frames buffered between the recorder and the capture loop.
const FRAME_BUFFER: usize = 32;

/// Records 16 kHz mono signed 16-bit PCM from a command that writes raw
/// samples to stdout (`arecord` by default).
#[derive(Debug, Clone)]
pub struct CommandMicrophone {
    program: String,
    args: Vec<String>,
}

impl Default for CommandMicrophone {
    fn default() -> Self {
        Self::new(
            "arecord",
            ["-q", "-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "raw"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl CommandMicrophone {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Microphone for CommandMicrophone {
    fn open(&self) -> Result<AudioStream, VoiceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => VoiceError::Unsupported("audio capture"),
                ErrorKind::PermissionDenied => VoiceError::Permission(e.to_string()),
                _ => VoiceError::Device(format!("Failed to spawn {}: {}", self.program, e)),
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Device("Failed to open recorder stdout".to_string()))?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let reader = tokio::spawn(async move {
            // The child lives in this task so aborting it kills the recorder.
            let _child = child;
            let mut buf = vec![0u8; FRAME_SAMPLES * 2];
            loop {
                match stdout.read_exact(&mut buf).await {
                    Ok(_) => {
                        if tx.send(AudioFrame::from_pcm16_le(&buf)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() != ErrorKind::UnexpectedEof {
                            tracing::warn!("microphone read failed: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        Ok(AudioStream::new(rx).on_release(move || reader.abort()))
    }
}
