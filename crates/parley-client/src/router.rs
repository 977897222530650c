//! Decodes inbound frames and dispatches them by type.

use crate::context::SessionContext;
use parley_types::{AssistantMessage, InboundMessage, MessageType, SessionEvent};
use parley_voice::{SpeechOutputController, SynthesisFallbackChain};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Metadata key carrying the audio URL of a `voice` frame.
const AUDIO_REF_KEY: &str = "audioRef";

/// Metadata key marking a `system` frame as an approval request.
const APPROVAL_KEY: &str = "approvalRequired";

pub struct MessageRouter {
    context: Arc<SessionContext>,
    output: Option<Arc<SpeechOutputController>>,
    replies: Option<Arc<SynthesisFallbackChain>>,
    audio_base: Option<Url>,
}

impl MessageRouter {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self {
            context,
            output: None,
            replies: None,
            audio_base: None,
        }
    }

    /// Plays the audio attached to `voice` frames.
    pub fn with_output(mut self, output: Arc<SpeechOutputController>) -> Self {
        self.output = Some(output);
        self
    }

    /// Reads assistant replies aloud in each agent's voice.
    pub fn with_spoken_replies(mut self, chain: Arc<SynthesisFallbackChain>) -> Self {
        self.replies = Some(chain);
        self
    }

    /// Origin that relative `audioRef` paths are resolved against.
    pub fn with_audio_base(mut self, base: Url) -> Self {
        self.audio_base = Some(base);
        self
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Routes frames until the connection manager drops its sender.
    pub async fn run(self, mut frames: mpsc::UnboundedReceiver<String>) {
        while let Some(frame) = frames.recv().await {
            self.route(&frame);
        }
        tracing::debug!(session_id = %self.context.session_id(), "frame stream ended");
    }

    /// Handles one raw frame. Malformed frames are logged and dropped.
    pub fn route(&self, raw: &str) {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.context.session_id(),
                    error = %e,
                    "dropping malformed frame"
                );
                return;
            }
        };

        match &message.kind {
            MessageType::Text => self.on_text(message),
            MessageType::TypingStart => self.on_typing(&message.agent_id, true),
            MessageType::TypingEnd => self.on_typing(&message.agent_id, false),
            MessageType::Voice => self.on_voice(&message),
            MessageType::Error => self.on_error(message),
            MessageType::System => self.on_system(message),
            MessageType::Unknown(kind) => {
                tracing::warn!(
                    session_id = %self.context.session_id(),
                    kind = %kind,
                    "ignoring frame of unknown type"
                );
            }
        }
    }

    fn on_text(&self, message: InboundMessage) {
        self.on_typing(&message.agent_id, false);

        if let Some(chain) = &self.replies {
            let chain = chain.clone();
            let text = message.content.clone();
            let agent_id = message.agent_id.clone();
            tokio::spawn(async move {
                if let Err(e) = chain.synthesize_for_agent(&text, &agent_id).await {
                    tracing::warn!(agent_id = %agent_id, error = %e, "could not speak reply");
                }
            });
        }

        let timestamp = timestamp_or_now(&message.timestamp);
        self.context
            .emit(SessionEvent::AssistantMessage(AssistantMessage {
                content: message.content,
                agent_id: message.agent_id,
                metadata: message.metadata,
                error: false,
                timestamp,
            }));
    }

    fn on_typing(&self, agent_id: &str, active: bool) {
        if self.context.set_composing(active) {
            self.context.emit(SessionEvent::Composing {
                agent_id: agent_id.to_string(),
                active,
            });
        }
    }

    fn on_voice(&self, message: &InboundMessage) {
        let Some(audio_ref) = message.metadata_str(AUDIO_REF_KEY) else {
            tracing::debug!("voice frame without audio reference");
            return;
        };
        let Some(output) = &self.output else {
            tracing::debug!("no audio output configured, skipping voice frame");
            return;
        };

        let Some(audio_ref) = self.resolve_audio_ref(audio_ref) else {
            return;
        };

        let output = output.clone();
        tokio::spawn(async move {
            if let Err(e) = output.play_audio(&audio_ref).await {
                tracing::warn!(audio_ref = %audio_ref, error = %e, "voice playback failed");
            }
        });
    }

    /// Absolute references pass through; relative ones need an audio base.
    fn resolve_audio_ref(&self, audio_ref: &str) -> Option<String> {
        if Url::parse(audio_ref).is_ok() {
            return Some(audio_ref.to_string());
        }
        let Some(base) = &self.audio_base else {
            tracing::warn!(audio_ref = %audio_ref, "relative audio reference without a base URL");
            return None;
        };
        match base.join(audio_ref) {
            Ok(url) => Some(url.into()),
            Err(e) => {
                tracing::warn!(audio_ref = %audio_ref, error = %e, "invalid audio reference");
                None
            }
        }
    }

    fn on_error(&self, message: InboundMessage) {
        self.on_typing(&message.agent_id, false);
        let content = message.error_text().to_string();
        tracing::warn!(agent_id = %message.agent_id, error = %content, "backend reported an error");
        self.context
            .emit(SessionEvent::AssistantMessage(AssistantMessage {
                content,
                agent_id: message.agent_id,
                metadata: message.metadata,
                error: true,
                timestamp: timestamp_or_now(&message.timestamp),
            }));
    }

    fn on_system(&self, message: InboundMessage) {
        match message.metadata_value(APPROVAL_KEY) {
            Some(approval) if !approval.is_null() => {
                let approval = approval.clone();
                self.context.emit(SessionEvent::ApprovalRequested {
                    agent_id: message.agent_id,
                    content: message.content,
                    approval,
                });
            }
            _ => tracing::debug!("ignoring system frame"),
        }
    }
}

fn timestamp_or_now(timestamp: &str) -> String {
    if timestamp.is_empty() {
        chrono::Utc::now().to_rfc3339()
    } else {
        timestamp.to_string()
    }
}
