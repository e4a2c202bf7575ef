pub mod bot_config;
mod event;
mod group;
mod outbound;
mod role;

pub use bot_config::{AutoReply, BotConfig, NoticeMessages, QuotaConfig, ReconnectConfig};
pub use event::{InboundEvent, BROADCAST_CONVERSATION};
pub use group::GroupContext;
pub use outbound::{OutboundContent, SendOptions};
pub use role::Role;
