//! BLE Wi-Fi provisioning engine.
//!
//! Lets a companion app connected over Bluetooth Low Energy list nearby
//! networks, manage a priority-ordered list of saved credentials and trigger
//! a connection on a device that has no network yet.
//!
//! Everything except the ESP-IDF drivers (`esp32` feature) is
//! platform-independent and tested on the host.

pub mod ble;
pub mod catalog;
pub mod config;
pub mod protocol;
pub mod service;
pub mod session;
pub mod store;
pub mod sweep;
pub mod wifi;

// Re-export commonly used items
pub use ble::{BleEvent, GattTable, NotificationSink};
pub use catalog::{DeleteTarget, NetworkCatalog, MAX_SAVED_NETWORKS};
pub use config::ServiceConfig;
pub use protocol::{ProvisioningRequest, ProvisioningResponse, RequestKind, Status};
pub use service::{ServiceError, WifiProvisioningService};
pub use sweep::ConnectionOutcome;
pub use wifi::{NetworkCredential, Security, WifiDriver};
