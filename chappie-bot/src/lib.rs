//! CHAPPIE BOT core: the connection lifecycle, the hot-reloadable command
//! registry and the permission/quota gates between an inbound message and
//! the command handler it triggers.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod messenger;
pub mod models;
pub mod permissions;
pub mod plugins;
pub mod quota;
pub mod registry;
pub mod template;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionManager, ConnectionState, RunExit, SessionHandle};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{BotError, HandlerError, LoadError};
pub use models::BotConfig;
pub use registry::{HandlerCatalog, HandlerRegistry};
