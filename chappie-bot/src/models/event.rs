use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pseudo-conversation carrying status broadcasts; never dispatched.
pub const BROADCAST_CONVERSATION: &str = "status@broadcast";

/// An inbound conversational message, as produced by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub conversation_id: String,
    pub actor_id: String,
    pub raw_text: String,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
    /// Transport message id, used to quote or react to the message.
    pub message_id: Option<String>,
    /// Display name the sender chose, if the transport knows it.
    pub sender_name: Option<String>,
}

impl InboundEvent {
    pub fn new(
        conversation_id: impl Into<String>,
        actor_id: impl Into<String>,
        raw_text: impl Into<String>,
        is_group: bool,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            actor_id: actor_id.into(),
            raw_text: raw_text.into(),
            is_group,
            timestamp: Utc::now(),
            message_id: None,
            sender_name: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Name to show in logs and replies: display name, else the actor id.
    pub fn sender_label(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.actor_id)
    }

    pub fn is_broadcast(&self) -> bool {
        self.conversation_id == BROADCAST_CONVERSATION
    }
}
