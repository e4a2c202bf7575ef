//! Outbound capability handed to the dispatcher, command handlers and the
//! permission resolver. Implemented by `connection::SessionHandle`.

use crate::error::BotError;
use crate::models::{GroupContext, OutboundContent, SendOptions};
use async_trait::async_trait;

/// Source of live group membership.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn fetch_group_context(&self, conversation_id: &str) -> Result<GroupContext, BotError>;
}

#[async_trait]
pub trait Messenger: GroupDirectory {
    async fn send(
        &self,
        conversation_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<(), BotError>;
}
