//! Persistence for the opaque credential blob, and presentation of pairing
//! challenges to the operator.

use crate::error::BotError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Where the session's credential blob lives between runs. The blob is
/// never inspected.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing was ever saved.
    fn load(&self) -> Result<Option<Vec<u8>>, BotError>;
    fn save(&self, blob: &[u8]) -> Result<(), BotError>;
    /// Forget the stored blob (after a logout).
    fn clear(&self) -> Result<(), BotError>;
}

/// Single-file store. Writes go to a sibling temp file that is renamed into
/// place, so a crash mid-write leaves the previous blob intact.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Vec<u8>>, BotError> {
        match fs::read(&self.path) {
            Ok(blob) if blob.is_empty() => Ok(None),
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &[u8]) -> Result<(), BotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &self.path)?;
        log::debug!("[CONN] Credentials saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), BotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shows an interactive pairing challenge to the operator.
pub trait ChallengePresenter: Send + Sync {
    fn present(&self, payload: &str);
}

/// Prints the raw challenge payload for the operator to render or paste
/// into a code generator.
pub struct TerminalPresenter;

impl ChallengePresenter for TerminalPresenter {
    fn present(&self, payload: &str) {
        log::info!("[CONN] Pairing challenge received, waiting for the operator");
        println!("\n📱 Pairing code (render as QR and scan it from the phone):\n\n{}\n", payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth_info.json"));
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_save_replaces_blob_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("auth_info.json");
        let store = FileCredentialStore::new(&path);

        store.save(b"first").unwrap();
        store.save(b"second").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"second");
        assert!(!path.with_extension("json.tmp").exists());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_unreadable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let store = FileCredentialStore::new(dir.path());
        assert!(store.load().is_err());
    }
}
