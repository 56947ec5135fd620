//! Wi-Fi provisioning service façade.
//!
//! Owns every piece of engine state: the network catalog, the connected
//! index, the session and the auto-connect sweep. The catalog and the
//! connected index sit behind one async mutex, and every Wi-Fi driver call
//! is made while holding it.
//!
//! # Lifecycle
//!
//! ```text
//! init ──► start ──► (writes handled) ──► stop ──► start ...
//!                                          │
//!                                          └──► delete
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ble_wifi_provisioner::ble::{BleEvent, RecordingSink};
//! use ble_wifi_provisioner::config::ServiceConfig;
//! use ble_wifi_provisioner::store::MemoryStore;
//! use ble_wifi_provisioner::wifi::SimulatedWifi;
//! use ble_wifi_provisioner::WifiProvisioningService;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let service = WifiProvisioningService::init(
//!     ServiceConfig::default(),
//!     Arc::new(SimulatedWifi::demo()),
//!     Box::new(MemoryStore::new()),
//!     Arc::new(RecordingSink::new()),
//! );
//! service.start().await?;
//!
//! let (tx, rx) = tokio::sync::mpsc::channel::<BleEvent>(16);
//! service.serve(rx, CancellationToken::new()).await;
//! # drop(tx);
//! # Ok(())
//! # }
//! ```

use crate::ble::{BleEvent, ConnHandle, GattTable, NotificationSink};
use crate::catalog::{CatalogError, DeleteTarget, NetworkCatalog};
use crate::config::ServiceConfig;
use crate::protocol::RequestKind;
use crate::session::Session;
use crate::store::CredentialStore;
use crate::sweep::{self, ConnectionOutcome};
use crate::wifi::{format_bssid, DriverError, WifiDriver};
use log::{debug, error, info, warn};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors returned by the service façade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service not started")]
    NotStarted,
    #[error("service busy")]
    Busy,
    #[error("timed out waiting for connection outcome")]
    OutcomeTimeout,
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// State guarded by the service lock.
#[derive(Debug)]
pub(crate) struct Guarded {
    pub(crate) catalog: NetworkCatalog,
    /// Priority index of the saved network the radio is connected to.
    pub(crate) connected: Option<usize>,
}

/// State shared by the session and the sweep.
pub(crate) struct Shared {
    pub(crate) config: ServiceConfig,
    pub(crate) driver: Arc<dyn WifiDriver>,
    pub(crate) state: Mutex<Guarded>,
    pub(crate) outcome: watch::Sender<ConnectionOutcome>,
}

impl Shared {
    pub(crate) fn new(
        config: ServiceConfig,
        driver: Arc<dyn WifiDriver>,
        catalog: NetworkCatalog,
    ) -> Self {
        let (outcome, _) = watch::channel(ConnectionOutcome::Idle);
        Self {
            config,
            driver,
            state: Mutex::new(Guarded {
                catalog,
                connected: None,
            }),
            outcome,
        }
    }

    pub(crate) fn publish(&self, outcome: ConnectionOutcome) {
        debug!("Connection outcome: {:?}", outcome);
        self.outcome.send_replace(outcome);
    }
}

struct SweepHandle {
    cancel: CancellationToken,
    task: JoinHandle<ConnectionOutcome>,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    sweep: Option<SweepHandle>,
}

/// The provisioning engine behind the GATT service.
pub struct WifiProvisioningService {
    shared: Arc<Shared>,
    session: Session,
    table: GattTable,
    lifecycle: StdMutex<Lifecycle>,
}

impl WifiProvisioningService {
    /// Load saved networks from `store` and build the GATT table.
    ///
    /// The radio stays untouched until [`start`](Self::start).
    pub fn init(
        config: ServiceConfig,
        driver: Arc<dyn WifiDriver>,
        store: Box<dyn CredentialStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let catalog = NetworkCatalog::load(store);
        info!(
            "Provisioning service initialized with {} saved networks",
            catalog.count()
        );
        let shared = Arc::new(Shared::new(config, driver, catalog));
        Self {
            session: Session::new(shared.clone(), sink),
            shared,
            table: GattTable::provisioning(),
            lifecycle: StdMutex::new(Lifecycle::default()),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attribute table to register with the GATT server.
    pub fn gatt_table(&self) -> &GattTable {
        &self.table
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.shared.config
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle().started
    }

    /// Power on the radio and start connecting to saved networks.
    pub async fn start(&self) -> Result<(), ServiceError> {
        if self.is_started() {
            debug!("Provisioning service already started");
            return Ok(());
        }
        self.shared.driver.on().await?;
        match self.shared.driver.mac_address().await {
            Ok(mac) => info!("Station MAC {}", format_bssid(&mac)),
            Err(e) => debug!("Station MAC unavailable: {}", e),
        }
        self.lifecycle().started = true;
        self.spawn_sweep();
        info!("Provisioning service started");
        Ok(())
    }

    /// Stop the sweep and reject further writes until the next start.
    pub async fn stop(&self) {
        let sweep = {
            let mut lifecycle = self.lifecycle();
            lifecycle.started = false;
            lifecycle.sweep.take()
        };
        if let Some(sweep) = sweep {
            sweep.cancel.cancel();
            if let Err(e) = sweep.task.await {
                warn!("Sweep task ended abnormally: {}", e);
            }
        }
        info!("Provisioning service stopped");
    }

    /// Tear the service down. The sweep gets `stop_grace` to wind down
    /// before it is aborted.
    pub async fn delete(self) {
        let sweep = {
            let mut lifecycle = self.lifecycle();
            lifecycle.started = false;
            lifecycle.sweep.take()
        };
        if let Some(mut sweep) = sweep {
            sweep.cancel.cancel();
            let grace = self.shared.config.stop_grace;
            if tokio::time::timeout(grace, &mut sweep.task).await.is_err() {
                warn!("Sweep did not stop within {:?}, aborting", grace);
                sweep.task.abort();
                self.shared.publish(ConnectionOutcome::Cancelled);
            }
        }
        self.session.disconnected();
        info!("Provisioning service deleted");
    }

    /// Handle a client write to `characteristic`.
    pub async fn handle_write(
        &self,
        characteristic: RequestKind,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        if !self.is_started() {
            warn!("Ignoring {} write: service not started", characteristic);
            return Err(ServiceError::NotStarted);
        }
        self.session.handle_write(characteristic, data).await;
        Ok(())
    }

    /// The client wrote the CCCD of `characteristic`.
    pub fn set_notifications(&self, characteristic: RequestKind, enabled: bool) {
        debug!("Notifications on {}: {}", characteristic, enabled);
        self.session.set_notifications(characteristic, enabled);
    }

    pub fn on_connect(&self, conn: ConnHandle) {
        info!("Client connected (handle {})", conn);
        self.session.connected(conn);
    }

    pub fn on_disconnect(&self) {
        info!("Client disconnected");
        self.session.disconnected();
    }

    /// Drive the service from transport events until `cancel` fires or the
    /// event stream closes.
    pub async fn serve(&self, mut events: mpsc::Receiver<BleEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                BleEvent::Connected(conn) => self.on_connect(conn),
                BleEvent::Disconnected => self.on_disconnect(),
                BleEvent::Subscribe {
                    characteristic,
                    enabled,
                } => self.set_notifications(characteristic, enabled),
                BleEvent::Write {
                    characteristic,
                    data,
                } => {
                    if let Err(e) = self.handle_write(characteristic, &data).await {
                        warn!("Write on {} not handled: {}", characteristic, e);
                    }
                }
            }
        }
        debug!("Event loop finished");
    }

    /// Number of saved networks.
    pub async fn num_networks(&self) -> usize {
        self.shared.state.lock().await.catalog.count()
    }

    /// Priority index of the connected saved network.
    pub async fn connected_index(&self) -> Option<usize> {
        self.shared.state.lock().await.connected
    }

    /// Connect to the saved network at `index`.
    pub async fn connect_saved(&self, index: usize) -> Result<(), ServiceError> {
        let mut guard = self.lock_bounded().await?;
        let credential = guard.catalog.get(index)?.clone();
        info!("Connecting to saved network {} ({})", index, credential.ssid);
        self.shared
            .driver
            .connect(&credential, self.shared.config.connect_timeout)
            .await?;
        guard.connected = Some(index);
        self.shared.publish(ConnectionOutcome::Connected { index });
        Ok(())
    }

    /// Delete every saved network, disconnecting if one was connected.
    pub async fn erase_all_networks(&self) -> Result<(), ServiceError> {
        let mut guard = self.lock_bounded().await?;
        guard.catalog.delete(DeleteTarget::All)?;
        if guard.connected.take().is_some() {
            if let Err(e) = self.shared.driver.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        }
        info!("All saved networks erased");
        Ok(())
    }

    /// Current IPv4 address of the station.
    pub async fn ip_address(&self) -> Result<Option<Ipv4Addr>, ServiceError> {
        let _guard = self.lock_bounded().await?;
        Ok(self.shared.driver.ip_address().await?)
    }

    /// Restart the auto-connect sweep from the highest priority network.
    pub async fn reconnect(&self) -> Result<(), ServiceError> {
        if !self.is_started() {
            return Err(ServiceError::NotStarted);
        }
        let previous = self.lifecycle().sweep.take();
        if let Some(sweep) = previous {
            sweep.cancel.cancel();
            if let Err(e) = sweep.task.await {
                warn!("Sweep task ended abnormally: {}", e);
            }
        }

        {
            let mut guard = self.lock_bounded().await?;
            if guard.connected.take().is_some() {
                self.shared.driver.disconnect().await?;
            }
        }
        self.spawn_sweep();
        Ok(())
    }

    /// Subscribe to connection outcomes.
    pub fn outcomes(&self) -> watch::Receiver<ConnectionOutcome> {
        self.shared.outcome.subscribe()
    }

    /// Wait until the outcome satisfies `predicate`.
    pub async fn wait_for_outcome(
        &self,
        predicate: impl FnMut(&ConnectionOutcome) -> bool,
        timeout: Duration,
    ) -> Result<ConnectionOutcome, ServiceError> {
        let mut rx = self.outcomes();
        // Bound to a local so the borrow of `rx` ends before `rx` drops
        let result = match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(outcome)) => Ok(*outcome),
            Ok(Err(_)) | Err(_) => Err(ServiceError::OutcomeTimeout),
        };
        result
    }

    async fn lock_bounded(&self) -> Result<tokio::sync::MutexGuard<'_, Guarded>, ServiceError> {
        tokio::time::timeout(self.shared.config.lock_timeout, self.shared.state.lock())
            .await
            .map_err(|_| ServiceError::Busy)
    }

    fn spawn_sweep(&self) {
        self.shared.publish(ConnectionOutcome::Idle);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep::run(self.shared.clone(), cancel.clone()));
        let previous = self.lifecycle().sweep.replace(SweepHandle { cancel, task });
        if let Some(previous) = previous {
            error!("Replaced a running sweep");
            previous.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::RecordingSink;
    use crate::protocol::{decode_request, ProvisioningRequest};
    use crate::store::MemoryStore;
    use crate::wifi::{NetworkCredential, Security, SimulatedWifi};
    use serde_json::{json, Value};

    struct Fixture {
        service: WifiProvisioningService,
        wifi: Arc<SimulatedWifi>,
        sink: RecordingSink,
        store: MemoryStore,
    }

    fn init_logger() {
        env_logger::builder().is_test(true).try_init().ok();
    }

    fn fixture(saved: &[(&str, &str)]) -> Fixture {
        init_logger();
        let mut store = MemoryStore::new();
        for (slot, (ssid, password)) in saved.iter().enumerate() {
            let cred = NetworkCredential::new(*ssid, *password, Security::Wpa2).unwrap();
            store.put(slot, &cred.to_bytes()).unwrap();
        }
        let wifi = Arc::new(SimulatedWifi::demo());
        let sink = RecordingSink::new();
        let service = WifiProvisioningService::init(
            ServiceConfig::default(),
            wifi.clone(),
            Box::new(store.clone()),
            Arc::new(sink.clone()),
        );
        Fixture {
            service,
            wifi,
            sink,
            store,
        }
    }

    fn subscribe_all(service: &WifiProvisioningService) {
        service.on_connect(1);
        for kind in RequestKind::ALL {
            service.set_notifications(kind, true);
        }
    }

    fn payloads(sink: &RecordingSink) -> Vec<Value> {
        sink.take()
            .into_iter()
            .map(|n| serde_json::from_slice(&n.payload).unwrap())
            .collect()
    }

    fn is_final(outcome: &ConnectionOutcome) -> bool {
        outcome.is_final()
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_loads_saved_networks() {
        let f = fixture(&[("MyHomeWiFi", "homepassword"), ("CafeGuest", "")]);
        assert_eq!(f.service.num_networks().await, 2);
        assert_eq!(f.service.connected_index().await, None);
        assert!(!f.wifi.is_powered());
        assert_eq!(f.service.gatt_table().characteristics.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sweeps_to_first_working_network() {
        let f = fixture(&[("Gone", "x"), ("MyHomeWiFi", "homepassword")]);
        f.service.start().await.unwrap();
        assert!(f.wifi.is_powered());

        let outcome = f
            .service
            .wait_for_outcome(is_final, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, ConnectionOutcome::Connected { index: 1 });
        assert_eq!(f.service.connected_index().await, Some(1));
        assert_eq!(f.wifi.connect_attempts(), vec!["Gone", "MyHomeWiFi"]);
        assert!(f.service.ip_address().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_failure_attempts_each_network_once() {
        let f = fixture(&[("A", "1"), ("B", "2"), ("C", "3")]);
        f.service.start().await.unwrap();
        let outcome = f
            .service
            .wait_for_outcome(is_final, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome, ConnectionOutcome::Failed);
        assert_eq!(f.wifi.connect_attempts(), vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_rejected_until_started() {
        let f = fixture(&[]);
        subscribe_all(&f.service);
        let result = f
            .service
            .handle_write(RequestKind::ListNetworks, br#"{"w":1}"#)
            .await;
        assert_eq!(result, Err(ServiceError::NotStarted));
        assert!(f.sink.is_empty());

        f.service.start().await.unwrap();
        f.service
            .handle_write(RequestKind::ListNetworks, br#"{"w":1}"#)
            .await
            .unwrap();
        assert!(!f.sink.is_empty());

        f.service.stop().await;
        assert_eq!(
            f.service
                .handle_write(RequestKind::ListNetworks, br#"{"w":1}"#)
                .await,
            Err(ServiceError::NotStarted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_sweep() {
        let f = fixture(&[("A", "1"), ("B", "2"), ("C", "3")]);
        f.service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.service.stop().await;

        assert_eq!(*f.service.outcomes().borrow(), ConnectionOutcome::Cancelled);
        assert_eq!(f.wifi.connect_attempts(), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_aborts_stuck_sweep() {
        let f = fixture(&[("MyHomeWiFi", "homepassword")]);
        f.wifi.set_connect_delay(Duration::from_secs(20));
        f.service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The sweep is inside a 20s connect; delete gives it 2s
        let started = tokio::time::Instant::now();
        f.service.delete().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_scenario_over_events() {
        let f = fixture(&[]);
        f.service.start().await.unwrap();
        f.service
            .wait_for_outcome(is_final, Duration::from_secs(5))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(BleEvent::Connected(3)).await.unwrap();
        tx.send(BleEvent::Subscribe {
            characteristic: RequestKind::SaveNetwork,
            enabled: true,
        })
        .await
        .unwrap();
        let body = json!({"w": 3, "r": "MyHomeWiFi", "m": "homepassword", "q": 3});
        tx.send(BleEvent::Write {
            characteristic: RequestKind::SaveNetwork,
            data: serde_json::to_vec(&body).unwrap(),
        })
        .await
        .unwrap();
        drop(tx);

        f.service.serve(rx, CancellationToken::new()).await;

        assert_eq!(payloads(&f.sink), vec![json!({"w": 4, "s": 0})]);
        assert_eq!(f.service.num_networks().await, 1);
        assert_eq!(f.service.connected_index().await, Some(0));
        assert!(f.store.snapshot()[0].is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_outcome_times_out() {
        let f = fixture(&[]);
        let result = f
            .service
            .wait_for_outcome(
                |o| matches!(o, ConnectionOutcome::Connected { .. }),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::OutcomeTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_stops_on_cancel() {
        let f = fixture(&[]);
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        f.service.serve(rx, cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_saved_and_erase_all() {
        let f = fixture(&[("CafeGuest", ""), ("MyHomeWiFi", "homepassword")]);
        f.service.connect_saved(1).await.unwrap();
        assert_eq!(f.service.connected_index().await, Some(1));
        assert_eq!(f.wifi.connected_ssid().as_deref(), Some("MyHomeWiFi"));

        assert!(matches!(
            f.service.connect_saved(5).await,
            Err(ServiceError::Catalog(CatalogError::Index { .. }))
        ));

        f.service.erase_all_networks().await.unwrap();
        assert_eq!(f.service.num_networks().await, 0);
        assert_eq!(f.service.connected_index().await, None);
        assert_eq!(f.wifi.disconnect_count(), 1);
        assert!(f.store.snapshot().iter().all(Option::is_none));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_runs_a_new_sweep() {
        let f = fixture(&[("MyHomeWiFi", "homepassword")]);
        f.service.start().await.unwrap();
        f.service
            .wait_for_outcome(is_final, Duration::from_secs(5))
            .await
            .unwrap();

        f.service.reconnect().await.unwrap();
        let outcome = f
            .service
            .wait_for_outcome(
                |o| matches!(o, ConnectionOutcome::Connected { .. }),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ConnectionOutcome::Connected { index: 0 });
        assert_eq!(f.wifi.disconnect_count(), 1);
        assert_eq!(f.wifi.connect_attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_then_list_scenario() {
        let f = fixture(&[("A", "1"), ("B", "2"), ("C", "3")]);
        f.service.start().await.unwrap();
        f.service
            .wait_for_outcome(is_final, Duration::from_secs(60))
            .await
            .unwrap();
        subscribe_all(&f.service);

        let edit = crate::protocol::encode_request(&ProvisioningRequest::EditNetwork {
            cur: 2,
            new: 0,
        });
        assert!(decode_request(&edit).is_ok());
        f.service
            .handle_write(RequestKind::EditNetwork, &edit)
            .await
            .unwrap();
        f.service
            .handle_write(RequestKind::ListNetworks, br#"{"w":1,"h":3}"#)
            .await
            .unwrap();

        let sent = payloads(&f.sink);
        assert_eq!(sent[0], json!({"w": 6, "s": 0}));
        let listed: Vec<&str> = sent[1..4].iter().map(|v| v["r"].as_str().unwrap()).collect();
        assert_eq!(listed, vec!["C", "A", "B"]);
        assert_eq!(sent[4], json!({"w": 2, "s": 0}));
    }
}
