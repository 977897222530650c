//! Shared wire and state types for the Parley voice transport.
//!
//! This crate provides the types exchanged between the transport layer and
//! its collaborators: the JSON frames carried over the duplex connection,
//! the connection lifecycle states, the events consumed by the UI layer, and
//! per-agent voice settings.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions, which keeps the dependency graph acyclic.

pub mod event;
pub mod message;
pub mod voice;

pub use event::{AssistantMessage, SessionEvent};
pub use message::{InboundMessage, MessageType, OutboundMessage};
pub use voice::VoiceSettings;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the duplex connection to the agent backend.
///
/// Owned by the connection manager; every other component only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and no pending retry.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open and frames are flowing.
    Connected,
    /// The socket closed; a retry is scheduled.
    Reconnecting,
    /// The retry budget is exhausted. Only a manual connect leaves this state.
    Failed,
}

impl ConnectionState {
    /// Returns the string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Whether the UI should show the live indicator.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
