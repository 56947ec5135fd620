//! Wi-Fi credentials and radio driver.
//!
//! # Components
//!
//! - [`credential`] - saved network credentials and their storage format (host-testable)
//! - [`driver`] - the [`WifiDriver`] seam used by the provisioning engine
//! - [`sim`] - simulated radio for host runs and tests
//! - `connection` - ESP-IDF station driver (ESP32 only)

pub mod credential;
pub mod driver;
pub mod sim;

#[cfg(feature = "esp32")]
mod connection;

pub use credential::{
    format_bssid, Bssid, CredentialError, NetworkCredential, Security, BSSID_LEN,
    MAX_PASSWORD_LEN, MAX_SSID_LEN,
};
pub use driver::{DriverError, ScanResult, WifiDriver};
pub use sim::{SimAccessPoint, SimulatedWifi};

#[cfg(feature = "esp32")]
pub use connection::EspWifiDriver;
