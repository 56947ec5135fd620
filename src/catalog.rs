//! Priority-ordered catalog of saved Wi-Fi networks.
//!
//! Position in the list is the priority: index 0 is attempted first by the
//! auto-connect sweep. Indices are always dense. Every mutation is written
//! through to the [`CredentialStore`] before it becomes visible; if the store
//! fails, the in-memory list is left untouched and the store slots that were
//! already rewritten are restored to their previous contents.
//!
//! # Move semantics
//!
//! [`NetworkCatalog::edit`] removes the entry at `cur` and reinserts it at
//! `new`, shifting the entries in between. It is a move, not a swap:
//!
//! ```text
//! [A, B, C]  edit(2, 0)  ->  [C, A, B]
//! [C, A, B]  edit(0, 2)  ->  [A, B, C]
//! [A, B, C]  edit(0, 2)  ->  [B, C, A]
//! ```

use crate::store::{CredentialStore, StoreError};
use crate::wifi::NetworkCredential;
use log::{debug, error, warn};
use thiserror::Error;

/// Maximum number of saved networks.
pub const MAX_SAVED_NETWORKS: usize = 8;

/// Which saved networks a delete removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    Index(usize),
    All,
}

/// Errors returned by catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The catalog already holds the maximum number of networks.
    #[error("catalog full ({max} networks)")]
    Capacity { max: usize },
    /// Index does not address a saved network.
    #[error("index {index} out of range (count {count})")]
    Index { index: usize, count: usize },
    /// Persisting the mutation failed; nothing changed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The saved network list and its backing store.
pub struct NetworkCatalog {
    entries: Vec<NetworkCredential>,
    store: Box<dyn CredentialStore>,
}

impl NetworkCatalog {
    /// Load saved networks from `store`.
    ///
    /// Slots are read in priority order until the first empty slot. A slot
    /// that cannot be read or decoded ends the list.
    pub fn load(store: Box<dyn CredentialStore>) -> Self {
        let mut entries = Vec::new();
        for slot in 0..MAX_SAVED_NETWORKS {
            match store.get(slot) {
                Ok(Some(blob)) => match NetworkCredential::from_bytes(&blob) {
                    Ok(cred) => entries.push(cred),
                    Err(e) => {
                        error!("Saved network in slot {} is corrupted: {}", slot, e);
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read slot {}: {}", slot, e);
                    break;
                }
            }
        }
        debug!("Loaded {} saved networks", entries.len());
        Self { entries, store }
    }

    /// Number of saved networks.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Credential at priority `idx`.
    pub fn get(&self, idx: usize) -> Result<&NetworkCredential, CatalogError> {
        self.entries.get(idx).ok_or(CatalogError::Index {
            index: idx,
            count: self.entries.len(),
        })
    }

    /// Saved networks in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkCredential> {
        self.entries.iter()
    }

    /// Add a network.
    ///
    /// With `requested` set, the network is inserted at that priority and
    /// lower-priority entries shift down; otherwise it is appended. Returns
    /// the index the network landed at.
    pub fn add(
        &mut self,
        credential: NetworkCredential,
        requested: Option<usize>,
    ) -> Result<usize, CatalogError> {
        if self.entries.len() >= MAX_SAVED_NETWORKS {
            return Err(CatalogError::Capacity {
                max: MAX_SAVED_NETWORKS,
            });
        }
        let idx = match requested {
            Some(idx) if idx > self.entries.len() => {
                return Err(CatalogError::Index {
                    index: idx,
                    count: self.entries.len(),
                })
            }
            Some(idx) => idx,
            None => self.entries.len(),
        };

        let mut next = self.entries.clone();
        next.insert(idx, credential);
        self.commit(next, idx)?;
        Ok(idx)
    }

    /// Replace the credential at `idx`, keeping its priority.
    pub fn replace(
        &mut self,
        idx: usize,
        credential: NetworkCredential,
    ) -> Result<(), CatalogError> {
        self.get(idx)?;
        let mut next = self.entries.clone();
        next[idx] = credential;
        self.commit(next, idx)
    }

    /// Move the entry at `cur` to `new`, shifting the entries in between.
    pub fn edit(&mut self, cur: usize, new: usize) -> Result<(), CatalogError> {
        self.get(cur)?;
        self.get(new)?;
        if cur == new {
            return Ok(());
        }
        let mut next = self.entries.clone();
        let moved = next.remove(cur);
        next.insert(new, moved);
        self.commit(next, cur.min(new))
    }

    /// Delete one entry (compacting the rest) or every entry.
    pub fn delete(&mut self, target: DeleteTarget) -> Result<(), CatalogError> {
        match target {
            DeleteTarget::Index(idx) => {
                self.get(idx)?;
                let mut next = self.entries.clone();
                next.remove(idx);
                self.commit(next, idx)
            }
            DeleteTarget::All => self.clear(),
        }
    }

    /// Erase every slot, including any stale slot beyond the loaded list.
    fn clear(&mut self) -> Result<(), CatalogError> {
        for slot in 0..MAX_SAVED_NETWORKS {
            if let Err(e) = self.store.erase(slot) {
                error!("Failed to erase slot {}: {}", slot, e);
                self.restore_slots(0, slot + 1);
                return Err(e.into());
            }
        }
        self.entries.clear();
        Ok(())
    }

    /// Persist `next` from slot `from` onwards, then make it current.
    fn commit(&mut self, next: Vec<NetworkCredential>, from: usize) -> Result<(), CatalogError> {
        let end = next.len().max(self.entries.len());
        for slot in from..end {
            let result = match next.get(slot) {
                Some(cred) => self.store.put(slot, &cred.to_bytes()),
                None => self.store.erase(slot),
            };
            if let Err(e) = result {
                error!("Failed to persist slot {}: {}", slot, e);
                self.restore_slots(from, slot + 1);
                return Err(e.into());
            }
        }
        self.entries = next;
        Ok(())
    }

    /// Best-effort rewrite of slots `from..to` with the current entries.
    fn restore_slots(&mut self, from: usize, to: usize) {
        for slot in from..to {
            let result = match self.entries.get(slot) {
                Some(cred) => self.store.put(slot, &cred.to_bytes()),
                None => self.store.erase(slot),
            };
            if let Err(e) = result {
                warn!("Rollback of slot {} failed: {}", slot, e);
            }
        }
    }
}

impl std::fmt::Debug for NetworkCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCatalog")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
