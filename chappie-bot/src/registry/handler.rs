use super::HandlerRegistry;
use crate::error::HandlerError;
use crate::messenger::Messenger;
use crate::models::{BotConfig, InboundEvent, OutboundContent, Role, SendOptions};
use async_trait::async_trait;

/// Everything a command sees when it runs.
pub struct CommandContext<'a> {
    pub messenger: &'a dyn Messenger,
    pub event: &'a InboundEvent,
    pub args: &'a [String],
    pub conversation_id: &'a str,
    /// Prefix the user typed.
    pub prefix: &'a str,
    pub role: Role,
    pub config: &'a BotConfig,
    pub registry: &'a HandlerRegistry,
}

impl CommandContext<'_> {
    /// Text reply quoting the triggering message.
    pub async fn reply(&self, text: impl Into<String> + Send) -> Result<(), HandlerError> {
        self.messenger
            .send(
                self.conversation_id,
                OutboundContent::text(text),
                SendOptions::quoting(self.event),
            )
            .await?;
        Ok(())
    }

    pub async fn send(&self, content: OutboundContent) -> Result<(), HandlerError> {
        self.messenger
            .send(self.conversation_id, content, SendOptions::default())
            .await?;
        Ok(())
    }
}

/// A command's entry point. Descriptor metadata (names, gates) lives in the
/// manifest; the handler only implements behaviour.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError>;
}
