//! NimBLE GATT server for the provisioning service.
//!
//! Registers the attribute table from [`GattTable`] with the NimBLE host,
//! forwards connection, subscription and write callbacks as [`BleEvent`]s and
//! pushes notifications for the engine.
//!
//! # Security Considerations
//!
//! Credentials travel as plaintext at the application layer. BLE link-layer
//! encryption after pairing protects them in transit; provisioning should
//! still happen in a physically controlled environment.

use super::{slot, BleEvent, ConnHandle, GattTable, NotificationSink, TransportError};
use crate::protocol::RequestKind;
use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

type CharacteristicHandle = Arc<NimbleMutex<BLECharacteristic>>;

/// NimBLE-backed transport.
pub struct NimbleTransport {
    characteristics: Vec<CharacteristicHandle>,
}

fn uuid(s: &str) -> Result<BleUuid, TransportError> {
    BleUuid::from_uuid128_string(s).map_err(|e| TransportError::Other(format!("{:?}", e)))
}

fn forward(events: &mpsc::Sender<BleEvent>, event: BleEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("Dropping BLE event: {}", e);
    }
}

impl NimbleTransport {
    /// Register the service and start advertising as `device_name`.
    pub fn start(
        table: &GattTable,
        device_name: &str,
        events: mpsc::Sender<BleEvent>,
    ) -> Result<Self, TransportError> {
        let device = BLEDevice::take();
        BLEDevice::set_device_name(device_name)
            .map_err(|e| TransportError::Other(format!("{:?}", e)))?;

        let server = device.get_server();

        let tx = events.clone();
        server.on_connect(move |_server, desc| {
            info!("BLE client connected");
            forward(&tx, BleEvent::Connected(desc.conn_handle()));
        });

        let tx = events.clone();
        server.on_disconnect(move |_desc, reason| {
            info!("BLE client disconnected: {:?}", reason);
            forward(&tx, BleEvent::Disconnected);
        });

        let service_uuid = uuid(table.service_uuid)?;
        let service = server.create_service(service_uuid);

        let mut characteristics = Vec::with_capacity(table.characteristics.len());
        for def in &table.characteristics {
            let mut properties = NimbleProperties::empty();
            if def.properties.read {
                properties |= NimbleProperties::READ;
            }
            if def.properties.write {
                properties |= NimbleProperties::WRITE;
            }
            if def.properties.notify {
                properties |= NimbleProperties::NOTIFY;
            }

            let characteristic = service
                .lock()
                .create_characteristic(uuid(def.uuid)?, properties);
            let kind = def.kind;

            let tx = events.clone();
            characteristic.lock().on_write(move |args| {
                let data = args.recv_data().to_vec();
                debug!("BLE write on {}: {} bytes", kind, data.len());
                forward(
                    &tx,
                    BleEvent::Write {
                        characteristic: kind,
                        data,
                    },
                );
            });

            // NimBLE adds the CCCD itself for notify characteristics
            let tx = events.clone();
            characteristic.lock().on_subscribe(move |_char, _desc, sub| {
                let enabled = !sub.is_empty();
                debug!("BLE notifications on {}: {}", kind, enabled);
                forward(
                    &tx,
                    BleEvent::Subscribe {
                        characteristic: kind,
                        enabled,
                    },
                );
            });

            characteristics.push(characteristic);
        }

        let advertising = device.get_advertising();
        advertising
            .lock()
            .set_data(
                BLEAdvertisementData::new()
                    .name(device_name)
                    .add_service_uuid(service_uuid),
            )
            .map_err(|e| TransportError::Other(format!("{:?}", e)))?;
        advertising
            .lock()
            .start()
            .map_err(|e| TransportError::Other(format!("{:?}", e)))?;
        info!("BLE advertising started as '{}'", device_name);

        Ok(Self { characteristics })
    }
}

impl NotificationSink for NimbleTransport {
    fn notify(
        &self,
        _conn: ConnHandle,
        characteristic: RequestKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let handle = self
            .characteristics
            .get(slot(characteristic))
            .ok_or_else(|| TransportError::Other(format!("{} not registered", characteristic)))?;
        handle.lock().set_value(payload).notify();
        Ok(())
    }
}
