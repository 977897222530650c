//! Per-conversation state shared by the router and the UI.

use parley_types::SessionEvent;
use tokio::sync::{broadcast, watch};

/// Default capacity for the session event broadcast channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// The session identity plus the channels the UI observes.
///
/// Created by the caller and handed to the router as an `Arc`.
#[derive(Debug)]
pub struct SessionContext {
    session_id: String,
    events: broadcast::Sender<SessionEvent>,
    composing: watch::Sender<bool>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let (composing, _) = watch::channel(false);
        Self {
            session_id: session_id.into(),
            events,
            composing,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watch_composing(&self) -> watch::Receiver<bool> {
        self.composing.subscribe()
    }

    pub fn is_composing(&self) -> bool {
        *self.composing.borrow()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(session_id = %self.session_id, "no session event subscribers");
        }
    }

    /// Sets the composing flag. Returns whether it changed.
    pub(crate) fn set_composing(&self, active: bool) -> bool {
        self.composing.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        })
    }
}
