//! Observable voice session state.
//!
//! The session is a single `watch` value shared by the controllers. Each
//! field has exactly one writer: the capture controller owns
//! `is_listening`, `is_voice_detected` and `silence_deadline`, the output
//! controller owns `is_speaking`, and the connection manager owns
//! `is_connected`. The UI only reads snapshots.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceSession {
    pub is_listening: bool,
    pub is_speaking: bool,
    pub is_voice_detected: bool,
    pub is_connected: bool,
    pub silence_deadline: Option<Instant>,
}

/// Shared handle to the session state.
#[derive(Debug, Clone)]
pub struct VoiceSessionState {
    tx: Arc<watch::Sender<VoiceSession>>,
}

impl Default for VoiceSessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSessionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(VoiceSession::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> VoiceSession {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceSession> {
        self.tx.subscribe()
    }

    /// Applies `f` and notifies subscribers only if something changed.
    pub fn update(&self, f: impl FnOnce(&mut VoiceSession)) {
        self.tx.send_if_modified(|session| {
            let before = *session;
            f(session);
            *session != before
        });
    }
}
