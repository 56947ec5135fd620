//! Auto-connect sweep.
//!
//! Walks the saved networks in priority order and stops at the first one
//! that connects. The service lock is held for one connect attempt at a
//! time, so provisioning requests can interleave between attempts. The
//! sweep checks its [`CancellationToken`] before every attempt and while
//! waiting for the lock or sleeping between attempts.

use crate::service::Shared;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress of the most recent connect sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionOutcome {
    /// No sweep has run yet.
    #[default]
    Idle,
    /// Attempting the saved network at `index`.
    Connecting { index: usize },
    /// Connected to the saved network at `index`.
    Connected { index: usize },
    /// Every saved network failed, or there were none.
    Failed,
    /// The sweep was stopped before it finished.
    Cancelled,
}

impl ConnectionOutcome {
    /// Whether the sweep that produced this outcome has ended.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Idle | Self::Connecting { .. })
    }
}

/// Run one sweep to completion, publishing progress on the outcome channel.
pub(crate) async fn run(shared: Arc<Shared>, cancel: CancellationToken) -> ConnectionOutcome {
    let outcome = sweep(&shared, &cancel).await;
    shared.publish(outcome);
    outcome
}

async fn sweep(shared: &Shared, cancel: &CancellationToken) -> ConnectionOutcome {
    let mut index = 0;
    loop {
        if cancel.is_cancelled() {
            debug!("Sweep cancelled before attempt {}", index);
            return ConnectionOutcome::Cancelled;
        }

        let mut guard = tokio::select! {
            _ = cancel.cancelled() => return ConnectionOutcome::Cancelled,
            guard = shared.state.lock() => guard,
        };

        if let Some(connected) = guard.connected {
            debug!("Already connected to saved network {}", connected);
            return ConnectionOutcome::Connected { index: connected };
        }

        let count = guard.catalog.count();
        let credential = match guard.catalog.get(index) {
            Ok(credential) => credential.clone(),
            Err(_) => {
                info!("No saved network connected ({} tried)", index);
                return ConnectionOutcome::Failed;
            }
        };

        shared.publish(ConnectionOutcome::Connecting { index });
        info!("Connecting to saved network {} ({})", index, credential.ssid);
        match shared
            .driver
            .connect(&credential, shared.config.connect_timeout)
            .await
        {
            Ok(()) => {
                guard.connected = Some(index);
                info!("Connected to {}", credential.ssid);
                return ConnectionOutcome::Connected { index };
            }
            Err(e) => warn!("Connect to {} failed: {}", credential.ssid, e),
        }
        drop(guard);

        index += 1;
        if index >= count {
            info!("No saved network connected ({} tried)", index);
            return ConnectionOutcome::Failed;
        }

        tokio::select! {
            _ = cancel.cancelled() => return ConnectionOutcome::Cancelled,
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
        }
    }
}
