//! BLE Wi-Fi provisioner firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== BLE Wi-Fi provisioner starting ===");

    if let Err(e) = firmware::run() {
        log::error!("Provisioner stopped: {}", e);
    }

    loop {
        std::thread::sleep(std::time::Duration::from_secs(10));
    }
}

#[cfg(feature = "esp32")]
mod firmware {
    use ble_wifi_provisioner::ble::NimbleTransport;
    use ble_wifi_provisioner::store::NvsStore;
    use ble_wifi_provisioner::wifi::EspWifiDriver;
    use ble_wifi_provisioner::{GattTable, ServiceConfig, WifiProvisioningService};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use std::error::Error;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Queue depth between NimBLE callbacks and the service.
    const EVENT_QUEUE_DEPTH: usize = 16;

    pub fn run() -> Result<(), Box<dyn Error>> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let store = NvsStore::open(nvs.clone())?;
        let driver = EspWifiDriver::new(peripherals.modem, sysloop, Some(nvs))?;
        let config = ServiceConfig::default();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async move {
            let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
            let transport =
                NimbleTransport::start(&GattTable::provisioning(), &config.device_name, tx)?;

            let service = WifiProvisioningService::init(
                config,
                Arc::new(driver),
                Box::new(store),
                Arc::new(transport),
            );
            service.start().await?;

            log::info!("Waiting for provisioning requests...");
            service.serve(rx, CancellationToken::new()).await;
            Ok::<(), Box<dyn Error>>(())
        })
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-provisioner' to try the engine on the host.");
}
