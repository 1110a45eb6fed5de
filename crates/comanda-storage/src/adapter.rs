// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`StorageAdapter`] over the SQLite [`Database`].

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use comanda_config::model::StorageConfig;
use comanda_core::{AdapterType, ComandaError, HealthStatus, PluginAdapter, StorageAdapter};

use crate::database::{map_tr_err, Database};

/// SQLite storage opened once by [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// The open database, shared with the session store.
    pub fn database(&self) -> Result<&Database, ComandaError> {
        self.db.get().ok_or_else(|| ComandaError::Storage {
            source: "storage used before initialize()".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    /// Healthy when the database answers and runs in the configured journal
    /// mode. Another process can switch a shared file out of WAL.
    async fn health_check(&self) -> Result<HealthStatus, ComandaError> {
        let mode = self
            .database()?
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
            })
            .await
            .map_err(map_tr_err)?;

        let wal = mode.eq_ignore_ascii_case("wal");
        Ok(if wal == self.config.wal_mode {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded(format!("journal mode is {mode}"))
        })
    }

    async fn shutdown(&self) -> Result<(), ComandaError> {
        match self.db.get() {
            Some(_) => self.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), ComandaError> {
        let path = &self.config.database_path;
        self.db
            .get_or_try_init(|| Database::open_with_options(path, self.config.wal_mode))
            .await?;
        info!(path = %path, wal_mode = self.config.wal_mode, "storage ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), ComandaError> {
        if self.config.wal_mode {
            self.database()?.checkpoint().await?;
        }
        debug!("storage flushed");
        Ok(())
    }
}
