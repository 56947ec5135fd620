//! Provisioning session: one request in, responses out.
//!
//! Each characteristic write is handled in three steps. The service lock is
//! acquired with a bounded wait (a client that times out gets `Busy`), the
//! payload is decoded and checked against the characteristic it arrived on,
//! and the request is dispatched against the catalog and the Wi-Fi driver.
//! The lock is released before any notification goes out.
//!
//! Notifications are sent only while a client is connected and has enabled
//! them through the characteristic's CCCD. Anything else is dropped.

use crate::ble::{self, ConnHandle, NotificationSink};
use crate::catalog::{DeleteTarget, MAX_SAVED_NETWORKS};
use crate::protocol::{
    decode_request_for, encode_response, NetworkInfo, ProvisioningRequest, ProvisioningResponse,
    RequestKind, Status, SAVED_NETWORK_RSSI,
};
use crate::service::{Guarded, Shared};
use crate::sweep::ConnectionOutcome;
use crate::wifi::{NetworkCredential, ScanResult};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Client link state.
#[derive(Debug, Default)]
struct Link {
    conn: Option<ConnHandle>,
    notify_enabled: [bool; 4],
}

/// Request handling and notification delivery for the connected client.
pub struct Session {
    shared: Arc<Shared>,
    sink: Arc<dyn NotificationSink>,
    link: Mutex<Link>,
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            shared,
            sink,
            link: Mutex::new(Link::default()),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new client connection.
    pub fn connected(&self, conn: ConnHandle) {
        let mut link = self.link();
        link.conn = Some(conn);
        link.notify_enabled = [false; 4];
    }

    /// Forget the client and its subscriptions.
    pub fn disconnected(&self) {
        *self.link() = Link::default();
    }

    /// Enable or disable notifications on `characteristic`.
    pub fn set_notifications(&self, characteristic: RequestKind, enabled: bool) {
        self.link().notify_enabled[ble::slot(characteristic)] = enabled;
    }

    /// Handle a write to `characteristic` and notify every response.
    pub async fn handle_write(&self, characteristic: RequestKind, data: &[u8]) {
        for response in self.process(characteristic, data).await {
            self.send(characteristic, &response);
        }
    }

    /// Handle a write to `characteristic`, returning the responses in order.
    pub async fn process(
        &self,
        characteristic: RequestKind,
        data: &[u8],
    ) -> Vec<ProvisioningResponse> {
        let lock_timeout = self.shared.config.lock_timeout;
        let mut guard = match tokio::time::timeout(lock_timeout, self.shared.state.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!("{} request rejected: service busy", characteristic);
                return vec![ProvisioningResponse::Status(Status::Busy)];
            }
        };

        let request = match decode_request_for(characteristic, data) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid {} request: {}", characteristic, e);
                return vec![ProvisioningResponse::Status(Status::Failure)];
            }
        };

        match request {
            ProvisioningRequest::ListNetworks {
                max_networks,
                timeout,
            } => self.list_networks(&mut guard, max_networks, timeout).await,
            ProvisioningRequest::SaveNetwork {
                credential,
                saved_index,
                connect,
            } => {
                let status = self
                    .save_network(&mut guard, credential, saved_index, connect)
                    .await;
                vec![ProvisioningResponse::Status(status)]
            }
            ProvisioningRequest::EditNetwork { cur, new } => {
                let status = edit_network(&mut guard, cur, new);
                vec![ProvisioningResponse::Status(status)]
            }
            ProvisioningRequest::DeleteNetwork { target } => {
                let status = self.delete_network(&mut guard, target).await;
                vec![ProvisioningResponse::Status(status)]
            }
        }
    }

    async fn list_networks(
        &self,
        guard: &mut Guarded,
        max_networks: usize,
        timeout: Duration,
    ) -> Vec<ProvisioningResponse> {
        let config = &self.shared.config;
        let max = if max_networks == 0 || max_networks > config.max_scan_networks {
            config.max_scan_networks
        } else {
            max_networks
        };
        let timeout = if timeout.is_zero() || timeout > config.max_scan_timeout {
            config.max_scan_timeout
        } else {
            timeout
        };

        let mut infos: Vec<NetworkInfo> = guard
            .catalog
            .iter()
            .enumerate()
            .take(max)
            .map(|(idx, cred)| saved_info(idx, cred, guard.connected == Some(idx)))
            .collect();

        let mut status = Status::Success;
        if infos.len() < max {
            // Ask for the full limit; skipped and duplicate results leave room
            match self
                .shared
                .driver
                .scan(self.shared.config.max_scan_networks, timeout)
                .await
            {
                Ok(results) => {
                    for result in results {
                        if infos.len() >= max {
                            break;
                        }
                        if result.ssid.is_empty() || already_listed(&infos, &result) {
                            continue;
                        }
                        infos.push(scanned_info(result));
                    }
                }
                Err(e) => {
                    warn!("Scan failed: {}", e);
                    status = Status::from(&e);
                }
            }
        }

        debug!("Listing {} networks", infos.len());
        infos
            .into_iter()
            .map(ProvisioningResponse::Network)
            .chain(std::iter::once(ProvisioningResponse::Status(status)))
            .collect()
    }

    async fn save_network(
        &self,
        guard: &mut Guarded,
        credential: NetworkCredential,
        saved_index: Option<usize>,
        connect: bool,
    ) -> Status {
        let count = guard.catalog.count();
        match saved_index {
            Some(idx) if idx >= count => {
                warn!("Save rejected: index {} out of range (count {})", idx, count);
                return Status::Failure;
            }
            None if count >= MAX_SAVED_NETWORKS => {
                warn!("Save rejected: {} networks already saved", count);
                return Status::Failure;
            }
            _ => {}
        }

        if connect {
            info!("Connecting to {}", credential.ssid);
            if let Err(e) = self
                .shared
                .driver
                .connect(&credential, self.shared.config.connect_timeout)
                .await
            {
                warn!("Connect to {} failed: {}", credential.ssid, e);
                return Status::from(&e);
            }
        }

        let ssid = credential.ssid.clone();
        let result = match saved_index {
            Some(idx) => guard.catalog.replace(idx, credential).map(|()| idx),
            None => guard.catalog.add(credential, None),
        };
        match result {
            Ok(idx) => {
                info!("Saved {} at index {}", ssid, idx);
                if connect {
                    guard.connected = Some(idx);
                    self.shared.publish(ConnectionOutcome::Connected { index: idx });
                } else if guard.connected == Some(idx) {
                    guard.connected = None;
                    info!("Replaced the connected network, disconnecting");
                    if let Err(e) = self.shared.driver.disconnect().await {
                        warn!("Disconnect failed: {}", e);
                    }
                }
                Status::Success
            }
            Err(e) => {
                error!("Failed to save {}: {}", ssid, e);
                if connect {
                    guard.connected = None;
                }
                Status::Failure
            }
        }
    }

    async fn delete_network(&self, guard: &mut Guarded, target: DeleteTarget) -> Status {
        if let Err(e) = guard.catalog.delete(target) {
            warn!("Delete failed: {}", e);
            return Status::Failure;
        }

        let deleted_connected = match (target, guard.connected) {
            (_, None) => false,
            (DeleteTarget::All, Some(_)) => true,
            (DeleteTarget::Index(idx), Some(connected)) if idx == connected => true,
            (DeleteTarget::Index(idx), Some(connected)) => {
                if connected > idx {
                    guard.connected = Some(connected - 1);
                }
                false
            }
        };

        if deleted_connected {
            guard.connected = None;
            info!("Deleted the connected network, disconnecting");
            if let Err(e) = self.shared.driver.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        }
        Status::Success
    }

    /// Encode and notify one response, subject to CCCD and MTU.
    fn send(&self, characteristic: RequestKind, response: &ProvisioningResponse) {
        let conn = {
            let link = self.link();
            match link.conn {
                Some(conn) if link.notify_enabled[ble::slot(characteristic)] => conn,
                _ => {
                    debug!("Dropping {} response: notifications disabled", characteristic);
                    return;
                }
            }
        };

        let payload = encode_response(characteristic, response);
        let mtu = self.shared.config.mtu;
        if payload.len() > mtu {
            warn!(
                "Dropping {} response: {} bytes exceeds MTU {}",
                characteristic,
                payload.len(),
                mtu
            );
            return;
        }

        if let Err(e) = self.sink.notify(conn, characteristic, &payload) {
            warn!("Failed to notify {} response: {}", characteristic, e);
        }
    }
}

fn edit_network(guard: &mut Guarded, cur: usize, new: usize) -> Status {
    if let Err(e) = guard.catalog.edit(cur, new) {
        warn!("Edit failed: {}", e);
        return Status::Failure;
    }
    guard.connected = guard.connected.map(|idx| moved_index(idx, cur, new));
    Status::Success
}

/// Where the entry at `idx` ends up after moving `cur` to `new`.
fn moved_index(idx: usize, cur: usize, new: usize) -> usize {
    if idx == cur {
        new
    } else if cur < idx && idx <= new {
        idx - 1
    } else if new <= idx && idx < cur {
        idx + 1
    } else {
        idx
    }
}

fn saved_info(idx: usize, cred: &NetworkCredential, connected: bool) -> NetworkInfo {
    NetworkInfo {
        status: Status::Success,
        ssid: cred.ssid.clone(),
        bssid: cred.bssid,
        security: cred.security,
        rssi: SAVED_NETWORK_RSSI,
        hidden: false,
        connected,
        saved_index: Some(idx),
    }
}

fn scanned_info(result: ScanResult) -> NetworkInfo {
    NetworkInfo {
        status: Status::Success,
        ssid: result.ssid,
        bssid: Some(result.bssid),
        security: result.security,
        rssi: result.rssi,
        hidden: result.hidden,
        connected: false,
        saved_index: None,
    }
}

/// A saved entry without a BSSID covers every BSSID of its SSID.
fn already_listed(infos: &[NetworkInfo], result: &ScanResult) -> bool {
    infos.iter().any(|info| {
        info.ssid == result.ssid && info.bssid.map_or(true, |bssid| bssid == result.bssid)
    })
}
