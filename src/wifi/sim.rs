//! Simulated Wi-Fi radio for host builds and tests.
//!
//! Holds a fixed set of access points. A connect succeeds when an access
//! point with the same SSID (and BSSID, if pinned) exists and the password
//! matches. Every connect attempt is recorded so callers can check ordering.

use super::credential::{NetworkCredential, Security};
use super::driver::{DriverError, ScanResult, WifiDriver};
use async_trait::async_trait;
use log::{debug, info};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Locally administered MAC reported by the simulated station.
const SIM_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// An access point visible to the simulated radio.
#[derive(Debug, Clone)]
pub struct SimAccessPoint {
    pub scan: ScanResult,
    /// Password accepted by this access point.
    pub password: String,
}

impl SimAccessPoint {
    /// Create an access point with a generated BSSID derived from `id`.
    pub fn new(id: u8, ssid: &str, password: &str, security: Security, rssi: i8) -> Self {
        Self {
            scan: ScanResult {
                ssid: ssid.to_string(),
                bssid: [0x02, 0xAA, 0x00, 0x00, 0x00, id],
                rssi,
                channel: 1 + id % 11,
                security,
                hidden: false,
            },
            password: password.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    powered: bool,
    access_points: Vec<SimAccessPoint>,
    connected: Option<String>,
    connect_attempts: Vec<String>,
    connect_delay: Duration,
    scan_error: Option<DriverError>,
    disconnects: usize,
}

/// Simulated [`WifiDriver`].
#[derive(Debug, Default)]
pub struct SimulatedWifi {
    state: Mutex<SimState>,
}

impl SimulatedWifi {
    /// Create a radio that can see the given access points.
    pub fn new(access_points: Vec<SimAccessPoint>) -> Self {
        Self {
            state: Mutex::new(SimState {
                access_points,
                ..SimState::default()
            }),
        }
    }

    /// A small neighbourhood used by the host console.
    pub fn demo() -> Self {
        Self::new(vec![
            SimAccessPoint::new(1, "MyHomeWiFi", "homepassword", Security::Wpa2, -45),
            SimAccessPoint::new(2, "CafeGuest", "", Security::Open, -67),
            SimAccessPoint::new(3, "Neighbor's Network", "letmein99", Security::Wpa2, -80),
            SimAccessPoint::new(4, "OldRouter", "abcde", Security::Wep, -72),
        ])
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every connect attempt take `delay` before completing.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Make the next scans fail with `error` (or succeed again with `None`).
    pub fn set_scan_error(&self, error: Option<DriverError>) {
        self.lock().scan_error = error;
    }

    /// SSIDs of every connect attempt, in call order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.lock().connect_attempts.clone()
    }

    /// SSID of the network currently connected, if any.
    pub fn connected_ssid(&self) -> Option<String> {
        self.lock().connected.clone()
    }

    /// Number of disconnect calls.
    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    /// Whether `on()` has been called.
    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }
}

#[async_trait]
impl WifiDriver for SimulatedWifi {
    async fn on(&self) -> Result<(), DriverError> {
        self.lock().powered = true;
        debug!("[sim] radio on");
        Ok(())
    }

    async fn connect(
        &self,
        credential: &NetworkCredential,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let delay = {
            let mut state = self.lock();
            state.connect_attempts.push(credential.ssid.clone());
            state.connect_delay
        };
        if !delay.is_zero() {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(DriverError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let accepted = state.access_points.iter().any(|ap| {
            ap.scan.ssid == credential.ssid
                && credential.bssid.map_or(true, |b| b == ap.scan.bssid)
                && ap.password == credential.password
        });
        if accepted {
            info!("[sim] connected to {}", credential.ssid);
            state.connected = Some(credential.ssid.clone());
            Ok(())
        } else {
            debug!("[sim] connection to {} rejected", credential.ssid);
            Err(DriverError::Failure(format!(
                "no access point accepted {}",
                credential.ssid
            )))
        }
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.connected = None;
        state.disconnects += 1;
        Ok(())
    }

    async fn scan(
        &self,
        max_count: usize,
        _timeout: Duration,
    ) -> Result<Vec<ScanResult>, DriverError> {
        let state = self.lock();
        if let Some(err) = &state.scan_error {
            return Err(err.clone());
        }
        Ok(state
            .access_points
            .iter()
            .take(max_count)
            .map(|ap| ap.scan.clone())
            .collect())
    }

    async fn ip_address(&self) -> Result<Option<Ipv4Addr>, DriverError> {
        Ok(self
            .lock()
            .connected
            .as_ref()
            .map(|_| Ipv4Addr::new(192, 168, 1, 100)))
    }

    async fn mac_address(&self) -> Result<[u8; 6], DriverError> {
        Ok(SIM_MAC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_matching_password() {
        let wifi = SimulatedWifi::demo();
        let good = NetworkCredential::new("MyHomeWiFi", "homepassword", Security::Wpa2).unwrap();
        let bad = NetworkCredential::new("MyHomeWiFi", "wrong", Security::Wpa2).unwrap();

        assert!(wifi.connect(&bad, Duration::from_secs(1)).await.is_err());
        assert!(wifi.connect(&good, Duration::from_secs(1)).await.is_ok());
        assert_eq!(wifi.connected_ssid().as_deref(), Some("MyHomeWiFi"));
        assert_eq!(wifi.connect_attempts(), vec!["MyHomeWiFi", "MyHomeWiFi"]);
        assert_eq!(
            wifi.ip_address().await.unwrap(),
            Some(Ipv4Addr::new(192, 168, 1, 100))
        );
    }

    #[tokio::test]
    async fn test_connect_respects_pinned_bssid() {
        let wifi = SimulatedWifi::demo();
        let pinned = NetworkCredential::open("CafeGuest")
            .unwrap()
            .with_bssid([9, 9, 9, 9, 9, 9]);
        assert!(wifi.connect(&pinned, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let wifi = SimulatedWifi::demo();
        wifi.set_connect_delay(Duration::from_secs(5));
        let cred = NetworkCredential::open("CafeGuest").unwrap();
        assert_eq!(
            wifi.connect(&cred, Duration::from_secs(1)).await,
            Err(DriverError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_scan_limits_and_errors() {
        let wifi = SimulatedWifi::demo();
        assert_eq!(wifi.scan(2, Duration::from_secs(1)).await.unwrap().len(), 2);

        wifi.set_scan_error(Some(DriverError::Timeout));
        assert_eq!(
            wifi.scan(2, Duration::from_secs(1)).await,
            Err(DriverError::Timeout)
        );
    }
}
