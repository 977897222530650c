//! Events emitted to the UI collaborator.

use serde::Serialize;
use serde_json::{Map, Value};

/// An assistant-authored entry for the transcript view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantMessage {
    pub content: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Set when the turn failed and `content` describes the failure.
    pub error: bool,
    pub timestamp: String,
}

/// Conversation updates produced by routing inbound frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    AssistantMessage(AssistantMessage),
    /// The "agent is composing" flag changed.
    Composing { agent_id: String, active: bool },
    /// An agent action is waiting for the user's approval.
    ApprovalRequested {
        agent_id: String,
        content: String,
        approval: Value,
    },
}
