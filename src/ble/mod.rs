//! BLE transport seam.
//!
//! The provisioning service exposes one GATT service with four request
//! characteristics, one per [`RequestKind`]. Each characteristic is
//! Read | Write | Notify and carries a Client Characteristic Configuration
//! Descriptor (CCCD) through which the client enables notifications.
//!
//! # GATT Service Structure
//!
//! ```text
//! Service: Wi-Fi Provisioning
//! ├── List Network   (Read, Write, Notify) + CCCD
//! ├── Save Network   (Read, Write, Notify) + CCCD
//! ├── Edit Network   (Read, Write, Notify) + CCCD
//! └── Delete Network (Read, Write, Notify) + CCCD
//! ```
//!
//! The engine only needs two things from the transport: a way to push
//! notifications ([`NotificationSink`]) and a stream of [`BleEvent`]s. The
//! NimBLE implementation lives in `nimble` (ESP32 only).

#[cfg(feature = "esp32")]
mod nimble;

#[cfg(feature = "esp32")]
pub use nimble::NimbleTransport;

use crate::protocol::RequestKind;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// UUID of the provisioning service.
pub const SERVICE_UUID: &str = "1d14d6ee-fd63-4fa1-bfa4-8f47b42119f0";

/// 16-bit UUID of the Client Characteristic Configuration Descriptor.
pub const CCCD_UUID: u16 = 0x2902;

/// Opaque handle of the connected client.
pub type ConnHandle = u16;

/// GATT characteristic properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl Properties {
    pub const READ_WRITE_NOTIFY: Properties = Properties {
        read: true,
        write: true,
        notify: true,
    };
}

/// One request characteristic of the provisioning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDef {
    pub kind: RequestKind,
    pub uuid: &'static str,
    pub properties: Properties,
    /// Whether a CCCD follows the characteristic.
    pub cccd: bool,
}

/// Static attribute table of the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattTable {
    pub service_uuid: &'static str,
    pub characteristics: [CharacteristicDef; 4],
}

impl GattTable {
    /// The provisioning service table.
    pub const fn provisioning() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            characteristics: [
                CharacteristicDef {
                    kind: RequestKind::ListNetworks,
                    uuid: "1d14d6ee-fd63-4fa1-bfa4-8f47b42119f1",
                    properties: Properties::READ_WRITE_NOTIFY,
                    cccd: true,
                },
                CharacteristicDef {
                    kind: RequestKind::SaveNetwork,
                    uuid: "1d14d6ee-fd63-4fa1-bfa4-8f47b42119f2",
                    properties: Properties::READ_WRITE_NOTIFY,
                    cccd: true,
                },
                CharacteristicDef {
                    kind: RequestKind::EditNetwork,
                    uuid: "1d14d6ee-fd63-4fa1-bfa4-8f47b42119f3",
                    properties: Properties::READ_WRITE_NOTIFY,
                    cccd: true,
                },
                CharacteristicDef {
                    kind: RequestKind::DeleteNetwork,
                    uuid: "1d14d6ee-fd63-4fa1-bfa4-8f47b42119f4",
                    properties: Properties::READ_WRITE_NOTIFY,
                    cccd: true,
                },
            ],
        }
    }

    /// Definition of the characteristic for `kind`.
    pub fn characteristic(&self, kind: RequestKind) -> &CharacteristicDef {
        // The table holds exactly one entry per kind, in declaration order
        &self.characteristics[slot(kind)]
    }

    /// Look up a characteristic by UUID (case-insensitive).
    pub fn by_uuid(&self, uuid: &str) -> Option<&CharacteristicDef> {
        self.characteristics
            .iter()
            .find(|c| c.uuid.eq_ignore_ascii_case(uuid))
    }
}

/// Position of `kind` in the attribute table.
pub(crate) fn slot(kind: RequestKind) -> usize {
    match kind {
        RequestKind::ListNetworks => 0,
        RequestKind::SaveNetwork => 1,
        RequestKind::EditNetwork => 2,
        RequestKind::DeleteNetwork => 3,
    }
}

/// Errors pushing a notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no client connected")]
    NotConnected,
    #[error("payload of {len} bytes exceeds MTU {mtu}")]
    PayloadTooLarge { len: usize, mtu: usize },
    #[error("transport error: {0}")]
    Other(String),
}

/// Outgoing side of the BLE transport.
pub trait NotificationSink: Send + Sync {
    /// Notify `payload` on `characteristic` to the client on `conn`.
    fn notify(
        &self,
        conn: ConnHandle,
        characteristic: RequestKind,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}

/// Events delivered by the BLE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    Connected(ConnHandle),
    Disconnected,
    /// The client wrote the CCCD of `characteristic`.
    Subscribe {
        characteristic: RequestKind,
        enabled: bool,
    },
    /// The client wrote a request to `characteristic`.
    Write {
        characteristic: RequestKind,
        data: Vec<u8>,
    },
}

/// A notification captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub conn: ConnHandle,
    pub characteristic: RequestKind,
    pub payload: Vec<u8>,
}

/// Sink that keeps every notification in memory.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the notifications recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn notify(
        &self,
        conn: ConnHandle,
        characteristic: RequestKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                conn,
                characteristic,
                payload: payload.to_vec(),
            });
        Ok(())
    }
}
