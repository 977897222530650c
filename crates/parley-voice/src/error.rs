use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    /// A capability (microphone, recognizer, synthesis engine) was not
    /// provided to the controller.
    #[error("{0} is not supported on this device")]
    Unsupported(&'static str),

    #[error("audio device access denied: {0}")]
    Permission(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("a listening session is already active")]
    AlreadyListening,

    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("voice API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("voice API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}
