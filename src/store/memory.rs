//! Volatile in-memory store.

use super::{CredentialStore, StoreError};
use crate::catalog::MAX_SAVED_NETWORKS;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Slots {
    blobs: Vec<Option<Vec<u8>>>,
    /// Remaining successful writes before every write fails.
    writes_before_failure: Option<usize>,
    failing_slot: Option<usize>,
    writes: usize,
}

/// In-memory [`CredentialStore`].
///
/// Clones share the same slots, so a test can keep a handle while the
/// catalog owns another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Slots>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots {
                blobs: vec![None; MAX_SAVED_NETWORKS],
                ..Slots::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let `count` more writes (put or erase) succeed, then fail every write.
    /// `None` disables failure injection.
    pub fn fail_writes_after(&self, count: Option<usize>) {
        self.lock().writes_before_failure = count;
    }

    /// Fail every write to `slot`. `None` clears it.
    pub fn fail_slot(&self, slot: Option<usize>) {
        self.lock().failing_slot = slot;
    }

    /// Snapshot of every slot.
    pub fn snapshot(&self) -> Vec<Option<Vec<u8>>> {
        self.lock().blobs.clone()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn check_write(slots: &mut Slots, slot: usize) -> Result<(), StoreError> {
        if slot >= slots.blobs.len() {
            return Err(StoreError::SlotOutOfRange {
                slot,
                capacity: slots.blobs.len(),
            });
        }
        if slots.failing_slot == Some(slot) {
            return Err(StoreError::Io(format!("injected failure on slot {}", slot)));
        }
        match slots.writes_before_failure.as_mut() {
            Some(0) => Err(StoreError::Io("injected write failure".into())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, slot: usize) -> Result<Option<Vec<u8>>, StoreError> {
        let slots = self.lock();
        slots
            .blobs
            .get(slot)
            .cloned()
            .ok_or(StoreError::SlotOutOfRange {
                slot,
                capacity: slots.blobs.len(),
            })
    }

    fn put(&mut self, slot: usize, blob: &[u8]) -> Result<(), StoreError> {
        let mut slots = self.lock();
        Self::check_write(&mut slots, slot)?;
        slots.blobs[slot] = Some(blob.to_vec());
        slots.writes += 1;
        Ok(())
    }

    fn erase(&mut self, slot: usize) -> Result<(), StoreError> {
        let mut slots = self.lock();
        Self::check_write(&mut slots, slot)?;
        slots.blobs[slot] = None;
        slots.writes += 1;
        Ok(())
    }
}
