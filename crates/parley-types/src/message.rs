//! Frames exchanged over the duplex connection.
//!
//! Inbound frames are produced by the agent backend and are immutable once
//! received. Field names are camelCase on the wire; the snake_case spellings
//! emitted by older backends are accepted as aliases.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Discriminant of an inbound frame.
///
/// Values the client does not understand are preserved in [`MessageType::Unknown`]
/// so they can be logged and skipped instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Text,
    TypingStart,
    TypingEnd,
    Voice,
    Error,
    System,
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::TypingStart => "typing_start",
            Self::TypingEnd => "typing_end",
            Self::Voice => "voice",
            Self::Error => "error",
            Self::System => "system",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => Self::Text,
            "typing_start" => Self::TypingStart,
            "typing_end" => Self::TypingEnd,
            "voice" => Self::Voice,
            "error" => Self::Error,
            "system" => Self::System,
            _ => Self::Unknown(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame received from the agent backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, alias = "agent_id", deserialize_with = "null_as_empty")]
    pub agent_id: String,
    #[serde(default, alias = "session_id", deserialize_with = "null_as_empty")]
    pub session_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Failure description carried by backend `error` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundMessage {
    /// Decodes a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Returns a metadata entry, if the frame carries one.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Text to show for an `error` frame: `content`, else the `error` field.
    pub fn error_text(&self) -> &str {
        if !self.content.is_empty() {
            return &self.content;
        }
        self.error
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or("Something went wrong")
    }

    /// Returns a metadata entry that is a non-empty string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata_value(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Reads an optional string field; the backend sends `null` for unset ids.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A user turn sent to the backend over the duplex connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub session_id: String,
    pub timestamp: String,
}

impl OutboundMessage {
    /// Builds a plain chat message stamped with the current UTC time.
    pub fn text(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            content: content.into(),
            agent_id: None,
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Addresses the message to a specific agent.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_frame() {
        let raw = json!({
            "type": "text",
            "content": "Hi",
            "agentId": "carol",
            "sessionId": "s1",
            "timestamp": "2025-01-01T00:00:00Z"
        })
        .to_string();

        let msg = InboundMessage::parse(&raw).expect("valid frame");
        assert_eq!(msg.kind, MessageType::Text);
        assert_eq!(msg.content, "Hi");
        assert_eq!(msg.agent_id, "carol");
        assert_eq!(msg.session_id, "s1");
        assert!(msg.metadata.is_none());
    }

    #[test]
    fn accepts_snake_case_ids_and_ignores_unknown_fields() {
        let raw = r#"{"type":"typing_start","agent_id":"alex","session_id":"s9","extra":42}"#;
        let msg = InboundMessage::parse(raw).expect("valid frame");
        assert_eq!(msg.kind, MessageType::TypingStart);
        assert_eq!(msg.agent_id, "alex");
        assert_eq!(msg.session_id, "s9");
        assert_eq!(msg.content, "");
    }

    #[test]
    fn null_string_fields_read_as_empty() {
        let raw = r#"{"type":"typing_start","agent_id":null,"session_id":"s1","content":null,"timestamp":null}"#;
        let msg = InboundMessage::parse(raw).expect("valid frame");
        assert_eq!(msg.kind, MessageType::TypingStart);
        assert_eq!(msg.agent_id, "");
        assert_eq!(msg.session_id, "s1");
        assert_eq!(msg.content, "");
        assert_eq!(msg.timestamp, "");
    }

    #[test]
    fn unknown_type_is_preserved() {
        let msg = InboundMessage::parse(r#"{"type":"presence_update"}"#).expect("valid frame");
        assert_eq!(msg.kind, MessageType::Unknown("presence_update".to_string()));
        assert_eq!(msg.kind.to_string(), "presence_update");
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(InboundMessage::parse(r#"{"content":"no type"}"#).is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn error_text_prefers_content() {
        let msg = InboundMessage::parse(r#"{"type":"error","error":"rate limited"}"#).expect("valid frame");
        assert_eq!(msg.error_text(), "rate limited");

        let msg = InboundMessage::parse(r#"{"type":"error","content":"agent crashed","error":"x"}"#)
            .expect("valid frame");
        assert_eq!(msg.error_text(), "agent crashed");

        let msg = InboundMessage::parse(r#"{"type":"error"}"#).expect("valid frame");
        assert_eq!(msg.error_text(), "Something went wrong");
    }

    #[test]
    fn metadata_str_skips_empty_and_non_string_values() {
        let raw = json!({
            "type": "voice",
            "metadata": { "audioRef": "", "duration": 3, "voice": "nova" }
        })
        .to_string();
        let msg = InboundMessage::parse(&raw).expect("valid frame");
        assert_eq!(msg.metadata_str("audioRef"), None);
        assert_eq!(msg.metadata_str("duration"), None);
        assert_eq!(msg.metadata_str("voice"), Some("nova"));
        assert!(msg.metadata_value("duration").is_some());
    }

    #[test]
    fn outbound_message_serializes_camel_case() {
        let out = OutboundMessage::text("s1", "hello").with_agent("judy");
        let json = serde_json::to_value(&out).expect("serialize");
        assert_eq!(json["type"], "message");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["agentId"], "judy");
        assert!(json.get("session_id").is_none());

        let anonymous = serde_json::to_value(OutboundMessage::text("s1", "hi")).expect("serialize");
        assert!(anonymous.get("agentId").is_none());
    }
}
