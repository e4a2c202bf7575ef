use super::Plugin;
use crate::connection::SessionHandle;
use crate::error::HandlerError;
use crate::messenger::Messenger;
use crate::models::{OutboundContent, SendOptions};
use async_trait::async_trait;

/// Messages the owner's direct chat when the bot first comes online.
pub struct OwnerNotifyPlugin {
    owner_conversation: String,
    bot_name: String,
}

impl OwnerNotifyPlugin {
    pub fn new(owner_conversation: impl Into<String>, bot_name: impl Into<String>) -> Self {
        Self {
            owner_conversation: owner_conversation.into(),
            bot_name: bot_name.into(),
        }
    }
}

#[async_trait]
impl Plugin for OwnerNotifyPlugin {
    fn id(&self) -> &str {
        "owner-notify"
    }

    async fn attach(&self, session: SessionHandle) -> Result<(), HandlerError> {
        let text = format!("✅ {} conectado correctamente.", self.bot_name);
        session
            .send(&self.owner_conversation, OutboundContent::text(text), SendOptions::default())
            .await?;
        Ok(())
    }
}
