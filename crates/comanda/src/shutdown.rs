// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! Installs handlers for SIGTERM and SIGINT (Ctrl+C), triggering a
//! [`CancellationToken`] that the HTTP server monitors. Once it stops, the
//! connection manager and storage are drained in order.

use std::time::Duration;

use comanda_core::{PluginAdapter, StorageAdapter};
use comanda_storage::SqliteStorage;
use comanda_whatsapp::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on draining the connection manager's background work.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is received.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, only Ctrl+C will stop the server");
            let _ = tokio::signal::ctrl_c().await;
            info!("received SIGINT (Ctrl+C), initiating shutdown");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl+C, initiating shutdown");
}

/// Stop the connection manager, then checkpoint and close storage.
///
/// Failures are logged; shutdown always runs to the end.
pub async fn drain_services(manager: &ConnectionManager, storage: &SqliteStorage) {
    match tokio::time::timeout(DRAIN_TIMEOUT, manager.shutdown()).await {
        Ok(Ok(())) => debug!("connection manager stopped"),
        Ok(Err(e)) => warn!(error = %e, "connection manager shutdown failed"),
        Err(_) => warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "connection manager did not drain in time"
        ),
    }

    if let Err(e) = storage.close().await {
        warn!(error = %e, "failed to close storage cleanly");
    }
    info!("shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_signal_handler_returns_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        token.cancel();
    }
}
