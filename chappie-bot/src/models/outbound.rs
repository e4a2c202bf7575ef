use super::InboundEvent;
use serde::Serialize;

/// Something the bot sends into a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<String>,
    },
    Reaction {
        emoji: String,
        target_message_id: String,
    },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundContent::Text {
            text: text.into(),
            mentions: Vec::new(),
        }
    }

    pub fn with_mentions(text: impl Into<String>, mentions: Vec<String>) -> Self {
        OutboundContent::Text {
            text: text.into(),
            mentions,
        }
    }

    pub fn reaction(emoji: impl Into<String>, target_message_id: impl Into<String>) -> Self {
        OutboundContent::Reaction {
            emoji: emoji.into(),
            target_message_id: target_message_id.into(),
        }
    }

    /// Text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutboundContent::Text { text, .. } => Some(text),
            OutboundContent::Reaction { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendOptions {
    /// Message id to quote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<String>,
}

impl SendOptions {
    /// Quote the triggering message when the transport gave it an id.
    pub fn quoting(event: &InboundEvent) -> Self {
        Self {
            quoted: event.message_id.clone(),
        }
    }
}
