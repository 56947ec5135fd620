//! ESP-IDF Wi-Fi driver.
//!
//! Wraps the blocking ESP-IDF station driver behind [`WifiDriver`]. Blocking
//! calls run on tokio's blocking pool so the provisioning engine keeps
//! answering BLE requests (with `Busy`) while a connect is in progress.

use super::credential::{NetworkCredential, Security};
use super::driver::{DriverError, ScanResult, WifiDriver};
use async_trait::async_trait;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::EspError;
use log::{info, warn};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type SharedWifi = Arc<Mutex<BlockingWifi<EspWifi<'static>>>>;

/// ESP-IDF backed [`WifiDriver`].
pub struct EspWifiDriver {
    wifi: SharedWifi,
}

impl EspWifiDriver {
    /// Create the station driver.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, EspError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self {
            wifi: Arc::new(Mutex::new(wifi)),
        })
    }

    /// Run a blocking closure against the driver on the blocking pool.
    async fn with_wifi<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&mut BlockingWifi<EspWifi<'static>>) -> Result<T, DriverError> + Send + 'static,
    {
        let wifi = self.wifi.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = wifi.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| DriverError::Failure(format!("driver task failed: {}", e)))?
    }
}

fn esp_err(e: EspError) -> DriverError {
    DriverError::Failure(format!("{:?}", e))
}

fn auth_method(security: Security) -> AuthMethod {
    match security {
        Security::Open => AuthMethod::None,
        Security::Wep => AuthMethod::WEP,
        Security::Wpa => AuthMethod::WPA,
        Security::Wpa2 => AuthMethod::WPA2Personal,
    }
}

fn security_from_auth(auth: Option<AuthMethod>) -> Security {
    match auth {
        None | Some(AuthMethod::None) => Security::Open,
        Some(AuthMethod::WEP) => Security::Wep,
        Some(AuthMethod::WPA) => Security::Wpa,
        Some(_) => Security::Wpa2,
    }
}

#[async_trait]
impl WifiDriver for EspWifiDriver {
    async fn on(&self) -> Result<(), DriverError> {
        self.with_wifi(|wifi| {
            wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))
                .map_err(esp_err)?;
            wifi.start().map_err(esp_err)
        })
        .await
    }

    async fn connect(
        &self,
        credential: &NetworkCredential,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        info!("Connecting to WiFi: {}", credential.ssid);

        let config = Configuration::Client(ClientConfiguration {
            ssid: credential
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| DriverError::Failure("invalid SSID".into()))?,
            bssid: credential.bssid,
            password: credential
                .password
                .as_str()
                .try_into()
                .map_err(|_| DriverError::Failure("invalid password".into()))?,
            auth_method: auth_method(credential.security),
            ..Default::default()
        });

        let attempt = self.with_wifi(move |wifi| {
            if wifi.is_connected().unwrap_or(false) {
                let _ = wifi.disconnect();
            }
            wifi.set_configuration(&config).map_err(esp_err)?;
            if !wifi.is_started().unwrap_or(false) {
                wifi.start().map_err(esp_err)?;
            }
            wifi.connect().map_err(esp_err)?;
            wifi.wait_netif_up().map_err(esp_err)
        });

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!("WiFi connect to {} timed out", credential.ssid);
                Err(DriverError::Timeout)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        info!("Disconnecting from WiFi");
        self.with_wifi(|wifi| wifi.disconnect().map_err(esp_err)).await
    }

    async fn scan(
        &self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<ScanResult>, DriverError> {
        let scan = self.with_wifi(move |wifi| {
            let found = wifi.scan().map_err(esp_err)?;
            Ok(found
                .into_iter()
                .take(max_count)
                .map(|ap| ScanResult {
                    hidden: ap.ssid.is_empty(),
                    ssid: ap.ssid.as_str().to_string(),
                    bssid: ap.bssid,
                    rssi: ap.signal_strength,
                    channel: ap.channel,
                    security: security_from_auth(ap.auth_method),
                })
                .collect())
        });
        tokio::time::timeout(timeout, scan)
            .await
            .map_err(|_| DriverError::Timeout)?
    }

    async fn ip_address(&self) -> Result<Option<Ipv4Addr>, DriverError> {
        self.with_wifi(|wifi| {
            if !wifi.is_connected().unwrap_or(false) {
                return Ok(None);
            }
            let info = wifi.wifi().sta_netif().get_ip_info().map_err(esp_err)?;
            Ok(Some(info.ip))
        })
        .await
    }

    async fn mac_address(&self) -> Result<[u8; 6], DriverError> {
        self.with_wifi(|wifi| wifi.wifi().sta_netif().get_mac().map_err(esp_err))
            .await
    }
}
