//! Error types shared across the dispatch pipeline.
//!
//! Permission denials and quota exhaustion are deliberately absent here: they
//! are ordinary dispatch outcomes, see `dispatcher::DispatchOutcome`.

use std::any::Any;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Connect/send failure, or an operation attempted while not connected.
    #[error("transport error: {0}")]
    Transport(String),
    /// Persisted credentials missing, invalid or rejected by the service.
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BotError {
    pub fn transport(msg: impl Into<String>) -> Self {
        BotError::Transport(msg.into())
    }
}

/// A command descriptor source that could not be registered.
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .path.display(), .reason)]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl LoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure raised by a command `run` or a plugin `attach`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Bot(#[from] BotError),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
