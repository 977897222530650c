//! Speech output with interruption ("barge-in").
//!
//! At most one utterance plays at a time. [`SpeechOutputController::stop`]
//! is synchronous: by the time it returns, `is_speaking` is false, the
//! engine has been told to cancel, and the awaiting `speak`/`play_audio`
//! call resolves with [`PlaybackOutcome::Interrupted`] at its next poll.

use crate::config::SpeakOptions;
use crate::error::VoiceError;
use crate::session::VoiceSessionState;
use async_trait::async_trait;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::oneshot;

/// A local text-to-speech engine that plays what it synthesizes.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Speaks `text` and resolves when playback ends.
    ///
    /// Dropping the returned future must stop playback.
    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), VoiceError>;

    /// Out-of-band cancellation for engines that keep playing after their
    /// future is dropped.
    fn cancel(&self) {}
}

/// Plays audio referenced by URL or path.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Plays the audio and resolves when playback ends.
    ///
    /// Dropping the returned future must stop playback.
    async fn play(&self, audio_ref: &str) -> Result<(), VoiceError>;

    fn cancel(&self) {}
}

/// How a playback request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Engine,
    Player,
}

struct Playback {
    id: u64,
    source: Source,
    cancel: oneshot::Sender<()>,
}

pub struct SpeechOutputController {
    engine: Option<Arc<dyn SpeechEngine>>,
    player: Option<Arc<dyn AudioPlayer>>,
    state: VoiceSessionState,
    current: Mutex<Option<Playback>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SpeechOutputController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOutputController")
            .field("engine", &self.engine.is_some())
            .field("player", &self.player.is_some())
            .field("is_speaking", &self.is_speaking())
            .finish()
    }
}

impl SpeechOutputController {
    pub fn new(state: VoiceSessionState) -> Self {
        Self {
            engine: None,
            player: None,
            state,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn SpeechEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_player(mut self, player: Arc<dyn AudioPlayer>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().is_some()
    }

    /// Speaks `text` with the local engine after cleaning it for speech.
    pub async fn speak(
        &self,
        text: &str,
        options: &SpeakOptions,
    ) -> Result<PlaybackOutcome, VoiceError> {
        let engine = self
            .engine
            .clone()
            .ok_or(VoiceError::Unsupported("speech synthesis"))?;
        options.validate()?;

        let text = clean_text_for_speech(text);
        if text.is_empty() {
            tracing::debug!("nothing to speak after cleaning");
            return Ok(PlaybackOutcome::Completed);
        }

        let (id, cancelled) = self.begin(Source::Engine);
        let result = tokio::select! {
            res = engine.speak(&text, options) => res.map(|()| PlaybackOutcome::Completed),
            _ = cancelled => Ok(PlaybackOutcome::Interrupted),
        };
        self.finish(id);
        result
    }

    /// Plays remotely synthesized audio.
    pub async fn play_audio(&self, audio_ref: &str) -> Result<PlaybackOutcome, VoiceError> {
        let player = self
            .player
            .clone()
            .ok_or(VoiceError::Unsupported("audio playback"))?;

        let (id, cancelled) = self.begin(Source::Player);
        let result = tokio::select! {
            res = player.play(audio_ref) => res.map(|()| PlaybackOutcome::Completed),
            _ = cancelled => Ok(PlaybackOutcome::Interrupted),
        };
        self.finish(id);
        result
    }

    /// Cancels in-progress playback. Returns whether anything was playing.
    pub fn stop(&self) -> bool {
        let playback = self.lock().take();
        match playback {
            Some(playback) => {
                self.cancel(playback);
                self.state.update(|s| s.is_speaking = false);
                tracing::debug!("speech output stopped");
                true
            }
            None => false,
        }
    }

    fn begin(&self, source: Source) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        let previous = self.lock().replace(Playback { id, source, cancel });
        if let Some(previous) = previous {
            self.cancel(previous);
        }
        self.state.update(|s| s.is_speaking = true);
        (id, cancelled)
    }

    fn finish(&self, id: u64) {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|p| p.id == id) {
            *current = None;
            drop(current);
            self.state.update(|s| s.is_speaking = false);
        }
    }

    fn cancel(&self, playback: Playback) {
        let _ = playback.cancel.send(());
        match playback.source {
            Source::Engine => {
                if let Some(engine) = &self.engine {
                    engine.cancel();
                }
            }
            Source::Player => {
                if let Some(player) = &self.player {
                    player.cancel();
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Playback>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SpeechPatterns {
    code_block: Regex,
    inline_code: Regex,
    url: Regex,
    markup: Regex,
    ellipsis: Regex,
    bangs: Regex,
    questions: Regex,
    whitespace: Regex,
}

fn patterns() -> &'static SpeechPatterns {
    static PATTERNS: OnceLock<SpeechPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("speech-cleaning patterns are valid");
        SpeechPatterns {
            code_block: re(r"```[\s\S]*?```"),
            inline_code: re(r"`[^`]*`"),
            url: re(r"https?://\S+"),
            markup: re(r"[*_~`#]"),
            ellipsis: re(r"\.{2,}"),
            bangs: re(r"!{2,}"),
            questions: re(r"\?{2,}"),
            whitespace: re(r"\s+"),
        }
    })
}

/// Strips content that should not be read aloud: code, URLs, markdown
/// markers, and runs of repeated punctuation.
pub fn clean_text_for_speech(text: &str) -> String {
    let p = patterns();
    let text = p.code_block.replace_all(text, "");
    let text = p.inline_code.replace_all(&text, "");
    let text = p.url.replace_all(&text, "");
    let text = p.markup.replace_all(&text, "");
    let text = p.ellipsis.replace_all(&text, ".");
    let text = p.bangs.replace_all(&text, "!");
    let text = p.questions.replace_all(&text, "?");
    let text = p.whitespace.replace_all(&text, " ");
    text.trim().to_string()
}
