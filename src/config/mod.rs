//! Service configuration.
//!
//! [`ServiceConfig`] holds the tunables of the provisioning engine. Defaults
//! suit an ESP32 talking to a phone; every field can be overridden through a
//! `PROVISIONER_*` environment variable on the host.
//!
//! | variable | field | unit |
//! |----------|-------|------|
//! | `PROVISIONER_LOCK_TIMEOUT_MS` | `lock_timeout` | ms |
//! | `PROVISIONER_RECONNECT_DELAY_MS` | `reconnect_delay` | ms |
//! | `PROVISIONER_CONNECT_TIMEOUT_MS` | `connect_timeout` | ms |
//! | `PROVISIONER_MAX_SCAN_NETWORKS` | `max_scan_networks` | count |
//! | `PROVISIONER_MAX_SCAN_TIMEOUT_MS` | `max_scan_timeout` | ms |
//! | `PROVISIONER_STOP_GRACE_MS` | `stop_grace` | ms |
//! | `PROVISIONER_MTU` | `mtu` | bytes |
//! | `PROVISIONER_DEVICE_NAME` | `device_name` | |

use log::warn;
use std::str::FromStr;
use std::time::Duration;

/// Name advertised over BLE.
pub const DEFAULT_DEVICE_NAME: &str = "WiFi-Provisioner";

/// Smallest usable ATT payload.
const MIN_MTU: usize = 20;

/// Tunables of the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How long a request waits for the service lock before answering Busy.
    pub lock_timeout: Duration,
    /// Pause between failed auto-connect attempts.
    pub reconnect_delay: Duration,
    /// Timeout handed to the driver for each connect.
    pub connect_timeout: Duration,
    /// Upper bound (and default) for `maxNetworks` in a list request.
    pub max_scan_networks: usize,
    /// Upper bound (and default) for a list request's scan timeout.
    pub max_scan_timeout: Duration,
    /// How long `delete` waits for the sweep before aborting it.
    pub stop_grace: Duration,
    /// Largest notification payload the transport accepts.
    pub mtu: usize,
    /// BLE advertisement name.
    pub device_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(30),
            max_scan_networks: 10,
            max_scan_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            mtu: 512,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `PROVISIONER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse(&lookup, "PROVISIONER_LOCK_TIMEOUT_MS") {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "PROVISIONER_RECONNECT_DELAY_MS") {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "PROVISIONER_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&lookup, "PROVISIONER_MAX_SCAN_NETWORKS") {
            if n == 0 {
                warn!("Ignoring PROVISIONER_MAX_SCAN_NETWORKS=0");
            } else {
                config.max_scan_networks = n;
            }
        }
        if let Some(ms) = parse(&lookup, "PROVISIONER_MAX_SCAN_TIMEOUT_MS") {
            config.max_scan_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "PROVISIONER_STOP_GRACE_MS") {
            config.stop_grace = Duration::from_millis(ms);
        }
        if let Some(mtu) = parse::<usize>(&lookup, "PROVISIONER_MTU") {
            if mtu < MIN_MTU {
                warn!("Ignoring PROVISIONER_MTU={} (minimum {})", mtu, MIN_MTU);
            } else {
                config.mtu = mtu;
            }
        }
        if let Some(name) = lookup("PROVISIONER_DEVICE_NAME").filter(|n| !n.is_empty()) {
            config.device_name = name;
        }

        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
