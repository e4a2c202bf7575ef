use super::ConnectionState;
use crate::error::BotError;
use crate::messenger::{GroupDirectory, Messenger};
use crate::models::{GroupContext, InboundEvent, OutboundContent, SendOptions};
use crate::transport::TransportSession;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 256;

/// Connection-level events fanned out to plugins.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Inbound(InboundEvent),
}

/// Cloneable view of the live session.
///
/// Always targets whatever session the connection manager currently holds,
/// so clones taken before a reconnect keep working after it. Operations fail
/// with a transport error unless the state is `Connected`.
#[derive(Clone)]
pub struct SessionHandle {
    slot: Arc<RwLock<Option<Arc<dyn TransportSession>>>>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    send_timeout: Duration,
}

impl SessionHandle {
    pub(crate) fn new(state: watch::Receiver<ConnectionState>, send_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            slot: Arc::new(RwLock::new(None)),
            state,
            events,
            send_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn install(&self, session: Arc<dyn TransportSession>) {
        *self.slot.write() = Some(session);
    }

    pub(crate) fn clear(&self) -> Option<Arc<dyn TransportSession>> {
        self.slot.write().take()
    }

    fn current(&self) -> Result<Arc<dyn TransportSession>, BotError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(BotError::transport(format!("not connected (state: {})", state)));
        }
        self.slot
            .read()
            .clone()
            .ok_or_else(|| BotError::transport("no active session"))
    }
}

#[async_trait]
impl GroupDirectory for SessionHandle {
    async fn fetch_group_context(&self, conversation_id: &str) -> Result<GroupContext, BotError> {
        let session = self.current()?;
        tokio::time::timeout(self.send_timeout, session.fetch_group_context(conversation_id))
            .await
            .map_err(|_| {
                BotError::transport(format!(
                    "group metadata for {} timed out after {:?}",
                    conversation_id, self.send_timeout
                ))
            })?
    }
}

#[async_trait]
impl Messenger for SessionHandle {
    async fn send(
        &self,
        conversation_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<(), BotError> {
        let session = self.current()?;
        tokio::time::timeout(self.send_timeout, session.send(conversation_id, content, options))
            .await
            .map_err(|_| {
                BotError::transport(format!(
                    "send to {} timed out after {:?}",
                    conversation_id, self.send_timeout
                ))
            })?
    }
}
