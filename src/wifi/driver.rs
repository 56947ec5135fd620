//! Wi-Fi radio driver seam.
//!
//! The provisioning engine never talks to a radio directly. Everything it
//! needs (power on, connect, scan, addresses) goes through [`WifiDriver`],
//! implemented by the ESP-IDF driver on device and by
//! [`SimulatedWifi`](super::SimulatedWifi) on the host.

use super::credential::{Bssid, NetworkCredential, Security};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// A network seen during a scan. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    pub bssid: Bssid,
    /// Signal strength in dBm.
    pub rssi: i8,
    pub channel: u8,
    pub security: Security,
    pub hidden: bool,
}

/// Errors reported by the Wi-Fi driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The operation failed (wrong password, AP not found, radio error).
    #[error("driver failure: {0}")]
    Failure(String),
    /// The operation did not complete within its timeout.
    #[error("driver operation timed out")]
    Timeout,
    /// The driver does not support the requested operation.
    #[error("operation not supported by driver")]
    NotSupported,
}

/// Wi-Fi radio operations used by the provisioning engine.
///
/// Calls may block for up to the supplied timeout. The engine serializes
/// every call under the service lock, so implementations do not need to
/// handle concurrent connect/scan themselves.
#[async_trait]
pub trait WifiDriver: Send + Sync {
    /// Power on the radio in station mode.
    async fn on(&self) -> Result<(), DriverError>;

    /// Connect to the network described by `credential`.
    async fn connect(
        &self,
        credential: &NetworkCredential,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Disconnect from the current network.
    async fn disconnect(&self) -> Result<(), DriverError>;

    /// Scan for nearby networks, returning at most `max_count` results.
    async fn scan(&self, max_count: usize, timeout: Duration)
        -> Result<Vec<ScanResult>, DriverError>;

    /// Current IPv4 address, if connected.
    async fn ip_address(&self) -> Result<Option<Ipv4Addr>, DriverError>;

    /// Station MAC address.
    async fn mac_address(&self) -> Result<[u8; 6], DriverError>;
}
