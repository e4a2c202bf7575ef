//! Boundary to the messaging service.
//!
//! The service's wire protocol is owned by an external bridge process; the
//! bot only sees sessions, a stream of [`TransportEvent`]s and the two
//! outbound operations the dispatcher needs.

pub mod bridge;

use crate::error::BotError;
use crate::models::{GroupContext, InboundEvent, OutboundContent, SendOptions};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tokio::sync::mpsc;

/// How a session authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum AuthMode {
    /// Pair by scanning a challenge code (`qr`).
    #[strum(serialize = "qr")]
    Interactive,
    /// Reuse the persisted credential blob (`codebot`).
    #[strum(serialize = "codebot")]
    Resume,
}

impl AuthMode {
    /// `codebot` resumes; anything else, or nothing, pairs interactively.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg.map(|a| a.trim().to_lowercase()) {
            Some(a) if a == "codebot" => AuthMode::Resume,
            _ => AuthMode::Interactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Interactive => "qr",
            AuthMode::Resume => "codebot",
        }
    }
}

/// Why the service closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The account unlinked this device. Credentials are dead.
    LoggedOut,
    /// Credentials were rejected or are corrupt.
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    /// Another client opened a session with the same credentials.
    ConnectionReplaced,
    /// The service asks for a fresh connection, usually right after pairing.
    RestartRequired,
    Unknown(u16),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Unknown(code) => write!(f, "Unknown({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            500 => DisconnectReason::BadSession,
            428 => DisconnectReason::ConnectionClosed,
            408 => DisconnectReason::ConnectionLost,
            440 => DisconnectReason::ConnectionReplaced,
            515 => DisconnectReason::RestartRequired,
            other => DisconnectReason::Unknown(other),
        }
    }
}

/// Link state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub status: LinkStatus,
    /// Set when `status` is `Close`.
    pub reason: Option<DisconnectReason>,
    /// Pairing challenge payload to show the operator.
    pub challenge: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            status: LinkStatus::Open,
            reason: None,
            challenge: None,
        }
    }

    pub fn closed(reason: DisconnectReason) -> Self {
        Self {
            status: LinkStatus::Close,
            reason: Some(reason),
            challenge: None,
        }
    }

    pub fn challenge(payload: impl Into<String>) -> Self {
        Self {
            status: LinkStatus::Connecting,
            reason: None,
            challenge: Some(payload.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// New opaque credential blob to persist.
    CredentialUpdate(Vec<u8>),
    ConnectionState(ConnectionUpdate),
    InboundMessage(InboundEvent),
}

/// A started session and the events it produces. The stream ending without
/// a close event means the link was lost.
pub struct Connection {
    pub session: Arc<dyn TransportSession>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        mode: AuthMode,
        credentials: Option<Vec<u8>>,
    ) -> Result<Connection, BotError>;
}

#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn send(
        &self,
        conversation_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<(), BotError>;

    async fn fetch_group_context(&self, conversation_id: &str) -> Result<GroupContext, BotError>;

    /// Drop the link without logging out.
    async fn close(&self) -> Result<(), BotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_from_arg() {
        assert_eq!(AuthMode::from_arg(Some("codebot")), AuthMode::Resume);
        assert_eq!(AuthMode::from_arg(Some("CODEBOT ")), AuthMode::Resume);
        assert_eq!(AuthMode::from_arg(Some("qr")), AuthMode::Interactive);
        assert_eq!(AuthMode::from_arg(Some("whatever")), AuthMode::Interactive);
        assert_eq!(AuthMode::from_arg(None), AuthMode::Interactive);
        assert_eq!(AuthMode::Resume.to_string(), "codebot");
        assert_eq!(AuthMode::Interactive.as_str(), "qr");
    }

    #[test]
    fn test_disconnect_reason_codes() {
        assert_eq!(DisconnectReason::from_status_code(401), DisconnectReason::LoggedOut);
        assert_eq!(DisconnectReason::from_status_code(500), DisconnectReason::BadSession);
        assert_eq!(DisconnectReason::from_status_code(515), DisconnectReason::RestartRequired);
        assert_eq!(DisconnectReason::from_status_code(999), DisconnectReason::Unknown(999));
        assert_eq!(DisconnectReason::Unknown(999).to_string(), "Unknown(999)");
    }
}
