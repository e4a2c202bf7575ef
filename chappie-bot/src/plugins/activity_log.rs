use super::Plugin;
use crate::connection::{SessionEvent, SessionHandle};
use crate::error::HandlerError;
use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;

/// Logs every inbound message and state change.
pub struct ActivityLogPlugin;

#[async_trait]
impl Plugin for ActivityLogPlugin {
    fn id(&self) -> &str {
        "activity-log"
    }

    async fn attach(&self, session: SessionHandle) -> Result<(), HandlerError> {
        let mut events = session.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::StateChanged(state)) => {
                        log::info!("[ACTIVITY] Connection {}", state);
                    }
                    Ok(SessionEvent::Inbound(event)) => {
                        log::debug!(
                            "[ACTIVITY] {} in {}{}: {}",
                            event.sender_label(),
                            event.conversation_id,
                            if event.is_group { " (group)" } else { "" },
                            event.raw_text
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[ACTIVITY] Dropped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }
}
