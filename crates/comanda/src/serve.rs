// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `comanda serve` command implementation.
//!
//! Opens SQLite storage, builds the encrypted session store and the
//! connection manager over the protocol bridge, then serves the HTTP
//! control surface until SIGINT/SIGTERM.

use std::sync::Arc;

use comanda_config::model::ComandaConfig;
use comanda_core::{ComandaError, PluginAdapter, StorageAdapter};
use comanda_gateway::{start_server, GatewayState};
use comanda_storage::SqliteStorage;
use comanda_whatsapp::{BridgeClient, ConnectionManager, ConnectionSettings, SessionStore};
use tracing::{info, warn};

use crate::shutdown;

/// Run the service until a shutdown signal arrives.
pub async fn run_serve(config: ComandaConfig) -> Result<(), ComandaError> {
    init_tracing(&config.log.level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting comanda");

    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let health = storage.health_check().await?;
    if !health.is_healthy() {
        warn!(%health, "storage is not in its configured state");
    }

    let store = SessionStore::from_config(storage.database()?.clone(), &config.whatsapp)?;
    if config.whatsapp.encryption_key.is_none() {
        warn!("WHATSAPP_ENCRYPTION_KEY is not set, session operations will fail until it is");
    }

    let client = Arc::new(BridgeClient::new(&config.whatsapp)?);
    let manager = ConnectionManager::new(
        ConnectionSettings::from_config(&config.whatsapp),
        store,
        client,
    );
    info!(session_id = %manager.settings().session_id, "connection manager ready");

    let cancel = shutdown::install_signal_handler();

    if config.whatsapp.auto_connect {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.connect().await {
                warn!(error = %e, "auto-connect failed, waiting for a connect action");
            }
        });
    }

    let state = GatewayState::new(manager.clone(), &config.gateway);
    let served = start_server(&config.gateway, state, cancel.clone()).await;

    // A bind failure returns before any signal; stop the handler either way.
    cancel.cancel();
    shutdown::drain_services(&manager, &storage).await;
    served
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `comanda` crates log at `log_level`
/// and everything else at `warn`.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("comanda={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
