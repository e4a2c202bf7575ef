//! Connection lifecycle: start, pairing, the inbound event loop and the
//! reconnect policy.
//!
//! ```text
//! Disconnected -> Connecting -> [AwaitingChallenge] -> Connected -> Closing -> Disconnected
//! ```
//!
//! Exactly one session exists at a time: a new `connect` is only issued after
//! the previous session reached `Disconnected`. Inbound messages are
//! dispatched inline, so they are processed strictly in arrival order.

mod backoff;
mod credentials;
mod session;

pub use backoff::Backoff;
pub use credentials::{ChallengePresenter, CredentialStore, FileCredentialStore, TerminalPresenter};
pub use session::{SessionEvent, SessionHandle};

use crate::dispatcher::Dispatcher;
use crate::error::BotError;
use crate::models::BotConfig;
use crate::plugins::PluginSet;
use crate::transport::{
    AuthMode, Connection, DisconnectReason, LinkStatus, Transport, TransportEvent,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Connected,
    Closing,
}

/// Why [`ConnectionManager::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// `shutdown()` was requested.
    Shutdown,
    /// The device was unlinked. The operator has to pair again with `qr`.
    LoggedOut,
    /// Too many consecutive reconnects without reaching `Connected`.
    GaveUp { attempts: u32 },
    /// Interactive session closed before pairing completed.
    PairingAborted,
}

/// What to do after a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Stop(RunExit),
    /// Start again (after backoff) in this mode.
    Reconnect(AuthMode),
    /// Credentials were rejected; auto-start halts.
    Reject,
}

/// Reconnect policy. `paired` is true once an interactive run has persisted
/// fresh credentials.
pub fn reconnect_decision(
    reason: DisconnectReason,
    mode: AuthMode,
    paired: bool,
) -> ReconnectDecision {
    match (reason, mode) {
        (DisconnectReason::LoggedOut, _) => ReconnectDecision::Stop(RunExit::LoggedOut),
        (DisconnectReason::BadSession, _) => ReconnectDecision::Reject,
        (_, AuthMode::Resume) => ReconnectDecision::Reconnect(AuthMode::Resume),
        (_, AuthMode::Interactive) if paired => ReconnectDecision::Reconnect(AuthMode::Resume),
        (_, AuthMode::Interactive) => ReconnectDecision::Stop(RunExit::PairingAborted),
    }
}

/// How one session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    Closed(DisconnectReason),
    Shutdown,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    presenter: Arc<dyn ChallengePresenter>,
    dispatcher: Arc<Dispatcher>,
    plugins: Arc<PluginSet>,
    commands_dir: PathBuf,
    config: Arc<BotConfig>,
    state_tx: watch::Sender<ConnectionState>,
    handle: SessionHandle,
    cancel: CancellationToken,
    registry_loaded: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<BotConfig>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        dispatcher: Arc<Dispatcher>,
        plugins: Arc<PluginSet>,
        commands_dir: impl Into<PathBuf>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let handle = SessionHandle::new(state_rx, config.send_timeout());
        Self {
            transport,
            credentials,
            presenter: Arc::new(TerminalPresenter),
            dispatcher,
            plugins,
            commands_dir: commands_dir.into(),
            config,
            state_tx,
            handle,
            cancel: CancellationToken::new(),
            registry_loaded: AtomicBool::new(false),
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn ChallengePresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Handle to the current session, valid across reconnects.
    pub fn session(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Stop the loop. An in-flight dispatch completes first; the session is
    /// then closed.
    pub fn shutdown(&self) {
        log::info!("[CONN] Shutdown requested");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run sessions until logout, shutdown or an unrecoverable error.
    pub async fn run(&self, mode: AuthMode) -> Result<RunExit, BotError> {
        let mut mode = mode;
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        let mut paired = false;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunExit::Shutdown);
            }

            let end = match self.start(mode).await? {
                Some(connection) => self.drive(connection, mode, &mut backoff, &mut paired).await,
                None => SessionEnd::Closed(DisconnectReason::ConnectionLost),
            };

            let reason = match end {
                SessionEnd::Shutdown => return Ok(RunExit::Shutdown),
                SessionEnd::Closed(reason) => reason,
            };
            log::warn!("[CONN] ❌ Connection closed: {}", reason);

            match reconnect_decision(reason, mode, paired) {
                ReconnectDecision::Stop(exit) => {
                    match exit {
                        RunExit::LoggedOut => log::error!(
                            "[CONN] Logged out by the service, pair again in qr mode"
                        ),
                        RunExit::PairingAborted => {
                            log::warn!("[CONN] Pairing did not complete, not reconnecting")
                        }
                        _ => {}
                    }
                    return Ok(exit);
                }
                ReconnectDecision::Reject => {
                    return Err(BotError::Auth(
                        "persisted credentials were rejected; pair again in qr mode".to_string(),
                    ));
                }
                ReconnectDecision::Reconnect(next) => {
                    if next != mode {
                        log::info!("[CONN] Pairing complete, continuing in {} mode", next);
                    }
                    mode = next;
                }
            }

            let Some(delay) = backoff.next_delay() else {
                log::error!(
                    "[CONN] Giving up after {} reconnect attempts without connecting",
                    backoff.attempts()
                );
                return Ok(RunExit::GaveUp {
                    attempts: backoff.attempts(),
                });
            };
            log::info!(
                "[CONN] Reconnecting in {:?} (attempt {}/{})",
                delay,
                backoff.attempts(),
                self.config.reconnect.max_attempts
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(RunExit::Shutdown),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Load credentials and connect. `Ok(None)` is a transport failure worth
    /// retrying; errors halt the run.
    async fn start(&self, mode: AuthMode) -> Result<Option<Connection>, BotError> {
        let credentials = match (mode, self.credentials.load()) {
            (AuthMode::Resume, Ok(Some(blob))) => Some(blob),
            (AuthMode::Resume, Ok(None)) => {
                return Err(BotError::Auth(
                    "no persisted credentials; run once in qr mode to pair".to_string(),
                ));
            }
            (AuthMode::Resume, Err(e)) => {
                return Err(BotError::Auth(format!("could not read credentials: {}", e)));
            }
            (AuthMode::Interactive, Ok(blob)) => blob,
            (AuthMode::Interactive, Err(e)) => {
                log::warn!("[CONN] Ignoring unreadable credentials: {}", e);
                None
            }
        };

        self.set_state(ConnectionState::Connecting);
        match self.transport.connect(mode, credentials).await {
            Ok(connection) => Ok(Some(connection)),
            Err(e) => {
                log::warn!("[CONN] Connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Ok(None)
            }
        }
    }

    /// Consume one session's events until it closes or shutdown is requested.
    async fn drive(
        &self,
        connection: Connection,
        mode: AuthMode,
        backoff: &mut Backoff,
        paired: &mut bool,
    ) -> SessionEnd {
        let Connection {
            session,
            mut events,
        } = connection;
        self.handle.install(session.clone());

        let end = loop {
            // Checked between events only, so a dispatch in progress finishes.
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionEnd::Shutdown,
                next = events.recv() => next,
            };
            let Some(event) = next else {
                log::warn!("[CONN] Event stream ended without a close event");
                break SessionEnd::Closed(DisconnectReason::ConnectionLost);
            };

            match event {
                TransportEvent::CredentialUpdate(blob) => match self.credentials.save(&blob) {
                    Ok(()) => {
                        if mode == AuthMode::Interactive {
                            *paired = true;
                        }
                    }
                    Err(e) => log::error!("[CONN] Failed to persist credentials: {}", e),
                },
                TransportEvent::ConnectionState(update) => match update.status {
                    LinkStatus::Open => {
                        self.set_state(ConnectionState::Connected);
                        backoff.reset();
                        log::info!("[CONN] ✅ Connected");
                        self.on_connected().await;
                    }
                    LinkStatus::Connecting => {
                        if let Some(challenge) = update.challenge {
                            if mode == AuthMode::Interactive {
                                self.set_state(ConnectionState::AwaitingChallenge);
                                self.presenter.present(&challenge);
                            } else {
                                log::warn!("[CONN] Ignoring pairing challenge in {} mode", mode);
                            }
                        }
                    }
                    LinkStatus::Close => {
                        break SessionEnd::Closed(
                            update.reason.unwrap_or(DisconnectReason::ConnectionClosed),
                        );
                    }
                },
                TransportEvent::InboundMessage(event) => {
                    self.handle.publish(SessionEvent::Inbound(event.clone()));
                    if self.state() == ConnectionState::Connected {
                        let outcome = self.dispatcher.on_inbound_event(&event, &self.handle).await;
                        log::debug!("[CONN] Dispatch outcome: {:?}", outcome);
                    } else {
                        log::debug!("[CONN] Dropping message received while {}", self.state());
                    }
                }
            }
        };

        self.set_state(ConnectionState::Closing);
        // Detach first so nothing can send through a closing session.
        self.handle.clear();
        if let Err(e) = session.close().await {
            log::debug!("[CONN] Session close: {}", e);
        }
        drop(session);
        self.set_state(ConnectionState::Disconnected);
        end
    }

    /// First-time work on `Connected`: load the registry, attach plugins.
    async fn on_connected(&self) {
        if !self.registry_loaded.swap(true, Ordering::SeqCst) {
            let report = self.dispatcher.registry().load(&self.commands_dir);
            for err in &report.errors {
                log::warn!("[CONN] Command not loaded: {}", err);
            }
        }
        self.plugins.attach_all(self.handle.clone()).await;
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::debug!("[CONN] {} -> {}", previous, state);
            self.handle.publish(SessionEvent::StateChanged(state));
        }
    }
}
