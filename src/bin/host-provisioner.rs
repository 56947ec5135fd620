//! Host console for the provisioning engine.
//!
//! Runs the engine against a simulated Wi-Fi radio and a file store, with
//! stdin standing in for the BLE link. A client is connected and subscribed
//! to every characteristic at startup; each input line is one write:
//!
//! ```text
//! list   {"w":1,"h":5}
//! save   {"w":3,"r":"MyHomeWiFi","m":"homepassword","q":3}
//! edit   {"w":5,"g":1,"j":0}
//! delete {"w":7,"g":-1}
//! ```
//!
//! Notifications are printed as they are sent. Saved networks live in
//! `$PROVISIONER_STORE_DIR` (default `~/.ble-wifi-provisioner/networks`).
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-provisioner
//! ```

use ble_wifi_provisioner::ble::{ConnHandle, NotificationSink, TransportError};
use ble_wifi_provisioner::store::FileStore;
use ble_wifi_provisioner::wifi::SimulatedWifi;
use ble_wifi_provisioner::{BleEvent, RequestKind, ServiceConfig, WifiProvisioningService};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Connection handle of the simulated client.
const CONSOLE_CONN: ConnHandle = 1;

/// Prints notifications to stdout.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn notify(
        &self,
        _conn: ConnHandle,
        characteristic: RequestKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        println!("<- {}: {}", characteristic, String::from_utf8_lossy(payload));
        Ok(())
    }
}

fn parse_line(line: &str) -> Result<Option<BleEvent>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, body) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let characteristic = match command {
        "list" => RequestKind::ListNetworks,
        "save" => RequestKind::SaveNetwork,
        "edit" => RequestKind::EditNetwork,
        "delete" => RequestKind::DeleteNetwork,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(BleEvent::Write {
        characteristic,
        data: body.trim().as_bytes().to_vec(),
    }))
}

fn store_dir() -> std::io::Result<PathBuf> {
    match std::env::var("PROVISIONER_STORE_DIR") {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => FileStore::default_dir(),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== BLE Wi-Fi provisioner (host) starting ===");

    let store = match store_dir().and_then(FileStore::open) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open credential store: {}", e);
            std::process::exit(1);
        }
    };
    info!("Saved networks in {:?}", store.dir());

    let service = WifiProvisioningService::init(
        ServiceConfig::from_env(),
        Arc::new(SimulatedWifi::demo()),
        Box::new(store),
        Arc::new(ConsoleSink),
    );
    if let Err(e) = service.start().await {
        error!("Failed to start provisioning service: {}", e);
        std::process::exit(1);
    }

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let setup = [BleEvent::Connected(CONSOLE_CONN)]
        .into_iter()
        .chain(RequestKind::ALL.into_iter().map(|characteristic| BleEvent::Subscribe {
            characteristic,
            enabled: true,
        }));
    for event in setup {
        if tx.send(event).await.is_err() {
            error!("Event queue closed during setup");
            std::process::exit(1);
        }
    }

    let mut outcomes = service.outcomes();
    tokio::spawn(async move {
        while outcomes.changed().await.is_ok() {
            let outcome = *outcomes.borrow_and_update();
            info!("Connection: {:?}", outcome);
        }
    });

    // Dropping `tx` at EOF ends `serve` once queued writes are handled
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            };
            match parse_line(&line) {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{} (commands: list, save, edit, delete)", e),
            }
        }
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
        }
        signal_cancel.cancel();
    });

    info!("Ready (Ctrl+D or Ctrl+C to exit)");
    service.serve(rx, cancel).await;

    info!(
        "{} saved networks, connected index {:?}",
        service.num_networks().await,
        service.connected_index().await
    );
    service.delete().await;
}
