//! Voice input and output for Parley sessions.
//!
//! Capture runs microphone frames through the level meter and voice activity
//! detector while a recognizer turns them into transcripts. Output speaks
//! assistant replies with a local engine or plays remotely synthesized,
//! agent-specific audio, and yields to the user as soon as they start
//! talking. Device access is injected through capability traits so the
//! controllers run unchanged against real processes or test doubles.

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod level;
pub mod mic;
pub mod output;
pub mod recognizer;
pub mod session;
pub mod synthesis;
pub mod tts;
pub mod vad;

pub use api::{CredentialSource, StaticCredential, Transcription, VoiceApiClient};
pub use capture::{
    AudioStream, CaptureEvent, Microphone, RecognitionEvent, RecognitionSession, Recognizer,
    SpeechCaptureController, StopReason,
};
pub use config::{ApiConfig, ListenOptions, SpeakOptions, VadConfig};
pub use error::VoiceError;
pub use level::{level, AudioFrame};
pub use mic::CommandMicrophone;
pub use output::{
    clean_text_for_speech, AudioPlayer, PlaybackOutcome, SpeechEngine, SpeechOutputController,
};
pub use recognizer::{encode_wav, TranscribingRecognizer, CAPTURE_SAMPLE_RATE};
pub use session::{VoiceSession, VoiceSessionState};
pub use synthesis::{RemoteSynthesizer, SynthesisFallbackChain, SynthesisRequest, SynthesisResult};
pub use tts::{CommandAudioPlayer, CommandSpeechEngine};
pub use vad::{VadEvent, VadState, VoiceActivityDetector};
