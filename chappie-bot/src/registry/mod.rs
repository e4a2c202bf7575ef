//! Command registry: immutable snapshots of command descriptors, swapped
//! wholesale on reload.
//!
//! Lookups clone the active `Arc<RegistrySnapshot>` under a read lock and
//! then work on that snapshot alone, so a lookup racing a reload sees either
//! the complete old command set or the complete new one.

mod builtin;
mod handler;
mod manifest;
pub mod watch;

pub use builtin::{HandlerCatalog, ReplyHandler};
pub use handler::{CommandContext, CommandHandler};
pub use manifest::{CommandManifest, ManifestKind};

use crate::error::LoadError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A registered command: gate metadata plus its handler.
pub struct CommandDescriptor {
    /// Primary name, lower-cased.
    pub name: String,
    /// Additional lower-cased names, never equal to `name`.
    pub aliases: Vec<String>,
    pub requires_owner: bool,
    pub requires_admin: bool,
    pub quota_exempt: bool,
    pub group_only: bool,
    pub private_only: bool,
    pub description: String,
    pub category: String,
    /// Manifest file this descriptor was loaded from.
    pub source: PathBuf,
    pub handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("requires_owner", &self.requires_owner)
            .field("requires_admin", &self.requires_admin)
            .field("quota_exempt", &self.quota_exempt)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// One consistent command set. Never mutated after construction.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    commands: Vec<Arc<CommandDescriptor>>,
    /// name or alias → index into `commands`
    index: HashMap<String, usize>,
}

impl RegistrySnapshot {
    /// Case-insensitive exact match on primary names and aliases.
    pub fn lookup(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| self.commands[i].clone())
    }

    /// Commands in load order.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<CommandDescriptor>> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Register `descriptor` unless one of its names is taken.
    fn insert(&mut self, descriptor: CommandDescriptor) -> Result<(), String> {
        let names: Vec<&String> = std::iter::once(&descriptor.name)
            .chain(descriptor.aliases.iter())
            .collect();

        for name in &names {
            if let Some(&existing) = self.index.get(*name) {
                return Err(format!(
                    "name '{}' is already registered by {}",
                    name,
                    self.commands[existing].source.display()
                ));
            }
        }

        let position = self.commands.len();
        for name in names {
            self.index.insert(name.clone(), position);
        }
        self.commands.push(Arc::new(descriptor));
        Ok(())
    }
}

/// Outcome of a load or reload.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub errors: Vec<LoadError>,
}

/// Build a snapshot from every `*.toml` manifest in `dir`, in file name
/// order. Bad or conflicting manifests become [`LoadError`]s; the rest load.
pub fn build_snapshot(dir: &Path, catalog: &HandlerCatalog) -> (RegistrySnapshot, Vec<LoadError>) {
    let mut snapshot = RegistrySnapshot::default();
    let mut errors = Vec::new();

    if !dir.exists() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            errors.push(LoadError::new(dir, format!("failed to create commands directory: {}", e)));
        } else {
            log::info!("[REGISTRY] Created commands directory {}", dir.display());
        }
        return (snapshot, errors);
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(LoadError::new(dir, format!("failed to read commands directory: {}", e)));
            return (snapshot, errors);
        }
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();

    for path in files {
        let result = CommandManifest::from_file(&path)
            .and_then(|manifest| manifest.into_descriptor(&path, catalog))
            .and_then(|descriptor| {
                let name = descriptor.name.clone();
                snapshot.insert(descriptor).map(|_| name)
            });

        match result {
            Ok(name) => log::debug!("[REGISTRY] Loaded command '{}' from {}", name, path.display()),
            Err(reason) => {
                let err = LoadError::new(&path, reason);
                log::warn!("[REGISTRY] Skipping {}", err);
                errors.push(err);
            }
        }
    }

    (snapshot, errors)
}

/// Holds the active snapshot and rebuilds it from the commands directory.
///
/// The registry does not watch anything itself; see [`watch`] for the
/// directory watcher that calls [`HandlerRegistry::reload`].
pub struct HandlerRegistry {
    source_dir: RwLock<PathBuf>,
    catalog: HandlerCatalog,
    active: RwLock<Arc<RegistrySnapshot>>,
    last_errors: RwLock<Vec<LoadError>>,
    /// Held across build and swap so an older build never lands last.
    rebuild_lock: Mutex<()>,
}

impl HandlerRegistry {
    /// Empty registry; nothing is read until [`load`](Self::load) or
    /// [`reload`](Self::reload).
    pub fn new(source_dir: impl Into<PathBuf>, catalog: HandlerCatalog) -> Self {
        Self {
            source_dir: RwLock::new(source_dir.into()),
            catalog,
            active: RwLock::new(Arc::new(RegistrySnapshot::default())),
            last_errors: RwLock::new(Vec::new()),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Load `source_dir` and make it the directory later reloads use.
    pub fn load(&self, source_dir: &Path) -> LoadReport {
        *self.source_dir.write() = source_dir.to_path_buf();
        self.rebuild(source_dir)
    }

    /// Rebuild from the current source directory and swap it in.
    pub fn reload(&self) -> LoadReport {
        let dir = self.source_dir();
        self.rebuild(&dir)
    }

    fn rebuild(&self, dir: &Path) -> LoadReport {
        let _serial = self.rebuild_lock.lock();
        let (snapshot, errors) = build_snapshot(dir, &self.catalog);
        let report = LoadReport {
            loaded: snapshot.len(),
            errors,
        };

        // The new snapshot is complete before it becomes visible.
        *self.active.write() = Arc::new(snapshot);
        *self.last_errors.write() = report.errors.clone();

        log::info!(
            "[REGISTRY] {} commands loaded from {} ({} rejected)",
            report.loaded,
            dir.display(),
            report.errors.len()
        );
        report
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.snapshot().lookup(name)
    }

    /// The active snapshot. Holding it pins that command set.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.active.read().clone()
    }

    pub fn source_dir(&self) -> PathBuf {
        self.source_dir.read().clone()
    }

    /// Errors from the most recent load or reload.
    pub fn last_errors(&self) -> Vec<LoadError> {
        self.last_errors.read().clone()
    }
}
