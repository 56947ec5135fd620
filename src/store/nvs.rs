//! NVS persistence for saved networks.
//!
//! Stores each catalog slot under its own key in ESP32's Non-Volatile
//! Storage so credentials persist across reboots.
//!
//! # Security
//!
//! Credentials are stored in plaintext unless NVS encryption is enabled in
//! the partition table.

use super::{CredentialStore, StoreError};
use crate::catalog::MAX_SAVED_NETWORKS;
use crate::wifi::{BSSID_LEN, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_sys::EspError;
use log::{debug, error};

/// NVS namespace for saved networks.
const NVS_NAMESPACE: &str = "wifi_prov";

/// Maximum blob size: header, BSSID, both length-prefixed strings.
const MAX_BLOB_SIZE: usize = 3 + BSSID_LEN + 1 + MAX_SSID_LEN + 1 + MAX_PASSWORD_LEN;

/// NVS-backed [`CredentialStore`].
pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    /// Open the provisioning namespace on the default partition.
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }

    fn key(slot: usize) -> Result<String, StoreError> {
        if slot >= MAX_SAVED_NETWORKS {
            return Err(StoreError::SlotOutOfRange {
                slot,
                capacity: MAX_SAVED_NETWORKS,
            });
        }
        Ok(format!("net{}", slot))
    }
}

fn nvs_err(e: EspError) -> StoreError {
    StoreError::Io(format!("{:?}", e))
}

impl CredentialStore for NvsStore {
    fn get(&self, slot: usize) -> Result<Option<Vec<u8>>, StoreError> {
        let key = Self::key(slot)?;
        let mut buf = [0u8; MAX_BLOB_SIZE];
        let bytes = self.nvs.get_raw(&key, &mut buf).map_err(nvs_err)?;
        Ok(bytes.map(|b| b.to_vec()))
    }

    /// Write with read-back verification to catch silent flash failures.
    fn put(&mut self, slot: usize, blob: &[u8]) -> Result<(), StoreError> {
        let key = Self::key(slot)?;
        self.nvs.set_raw(&key, blob).map_err(nvs_err)?;

        let mut verify_buf = [0u8; MAX_BLOB_SIZE];
        match self.nvs.get_raw(&key, &mut verify_buf).map_err(nvs_err)? {
            Some(read) if read == blob => {
                debug!("Slot {} saved and verified in NVS", slot);
                Ok(())
            }
            Some(_) => {
                error!("Slot {} verification failed - data mismatch after save", slot);
                Err(StoreError::Io(format!("slot {} verification mismatch", slot)))
            }
            None => {
                error!("Slot {} not found after save - possible flash failure", slot);
                Err(StoreError::Io(format!("slot {} missing after save", slot)))
            }
        }
    }

    fn erase(&mut self, slot: usize) -> Result<(), StoreError> {
        let key = Self::key(slot)?;
        self.nvs.remove(&key).map_err(nvs_err)?;
        Ok(())
    }
}
