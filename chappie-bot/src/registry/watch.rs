//! Commands directory watcher.
//!
//! `spawn_watcher` turns filesystem changes to `*.toml` manifests into
//! [`ReloadSignal`]s; `run_reload_loop` coalesces bursts of signals and calls
//! [`HandlerRegistry::reload`]. The two are split so the reload side can be
//! driven without a real filesystem watcher.

use super::HandlerRegistry;
use crate::error::BotError;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A manifest changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSignal {
    pub path: PathBuf,
}

/// Keeps the underlying watcher alive. Dropping it stops the signals.
pub struct RegistryWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl RegistryWatcher {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_manifest(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

pub fn spawn_watcher(
    dir: &Path,
    tx: mpsc::UnboundedSender<ReloadSignal>,
) -> Result<RegistryWatcher, BotError> {
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) if is_relevant(&event.kind) => {
                for path in event.paths.into_iter().filter(|p| is_manifest(p)) {
                    let _ = tx.send(ReloadSignal { path });
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("[REGISTRY] Watch error: {}", e),
        },
        Config::default(),
    )
    .map_err(|e| BotError::Config(format!("failed to create commands watcher: {}", e)))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| BotError::Config(format!("failed to watch {}: {}", dir.display(), e)))?;

    log::info!("[REGISTRY] Watching {} for command changes", dir.display());

    Ok(RegistryWatcher {
        _watcher: watcher,
        dir: dir.to_path_buf(),
    })
}

/// Reload the registry once per burst of signals. A burst ends when no new
/// signal arrives for `debounce`.
pub async fn run_reload_loop(
    registry: Arc<HandlerRegistry>,
    mut rx: mpsc::UnboundedReceiver<ReloadSignal>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let mut coalesced = 1usize;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = tokio::time::timeout(debounce, rx.recv()) => match next {
                    Ok(Some(_)) => coalesced += 1,
                    // Quiet period elapsed, or the sender is gone.
                    Ok(None) | Err(_) => break,
                },
            }
        }

        log::info!(
            "[REGISTRY] Change detected ({}, {} events), reloading",
            first.path.display(),
            coalesced
        );

        let reg = registry.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || reg.reload()).await {
            log::error!("[REGISTRY] Reload task failed: {}", e);
        }
    }
    log::debug!("[REGISTRY] Reload loop stopped");
}
