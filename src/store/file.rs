//! Credential persistence for host (development) builds.
//!
//! Stores one file per catalog slot so saved networks persist across runs.
//! Uses `~/.ble-wifi-provisioner/networks/` by default.

use super::{CredentialStore, StoreError};
use crate::catalog::MAX_SAVED_NETWORKS;
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File-backed [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Get the default store directory.
    ///
    /// Returns `~/.ble-wifi-provisioner/networks`
    pub fn default_dir() -> io::Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
        Ok(PathBuf::from(home)
            .join(".ble-wifi-provisioner")
            .join("networks"))
    }

    /// Directory holding the slot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: usize) -> Result<PathBuf, StoreError> {
        if slot >= MAX_SAVED_NETWORKS {
            return Err(StoreError::SlotOutOfRange {
                slot,
                capacity: MAX_SAVED_NETWORKS,
            });
        }
        Ok(self.dir.join(format!("net{}.bin", slot)))
    }
}

impl CredentialStore for FileStore {
    fn get(&self, slot: usize) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.slot_path(slot)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&mut self, slot: usize, blob: &[u8]) -> Result<(), StoreError> {
        let path = self.slot_path(slot)?;
        fs::write(&path, blob)?;

        // Verify write by reading back
        let read_back = fs::read(&path)?;
        if read_back != blob {
            return Err(StoreError::Io(format!(
                "verification failed for slot {}: wrote {} bytes, read {} bytes",
                slot,
                blob.len(),
                read_back.len()
            )));
        }

        debug!("Slot {} written to {:?}", slot, path);
        Ok(())
    }

    fn erase(&mut self, slot: usize) -> Result<(), StoreError> {
        let path = self.slot_path(slot)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
