//! Persistent credential storage.
//!
//! The network catalog persists one credential blob per slot; slot `i` holds
//! the credential with priority `i`. Backends:
//!
//! - [`MemoryStore`] - volatile, with failure injection (tests)
//! - [`FileStore`] - one file per slot in a directory (host)
//! - `NvsStore` - ESP32 Non-Volatile Storage (ESP32 only)

mod file;
mod memory;
#[cfg(feature = "esp32")]
mod nvs;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "esp32")]
pub use nvs::NvsStore;

use thiserror::Error;

/// Errors reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Reading or writing the underlying medium failed.
    #[error("storage I/O error: {0}")]
    Io(String),
    /// Slot index outside the store's capacity.
    #[error("slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange { slot: usize, capacity: usize },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Indexed blob storage backing the network catalog.
pub trait CredentialStore: Send {
    /// Read the blob in `slot`, `None` if the slot is empty.
    fn get(&self, slot: usize) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `blob` to `slot`, replacing any previous contents.
    fn put(&mut self, slot: usize, blob: &[u8]) -> Result<(), StoreError>;

    /// Erase `slot`. Erasing an empty slot succeeds.
    fn erase(&mut self, slot: usize) -> Result<(), StoreError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    fn get(&self, slot: usize) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(slot)
    }

    fn put(&mut self, slot: usize, blob: &[u8]) -> Result<(), StoreError> {
        (**self).put(slot, blob)
    }

    fn erase(&mut self, slot: usize) -> Result<(), StoreError> {
        (**self).erase(slot)
    }
}
