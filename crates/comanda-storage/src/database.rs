// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! `Database` wraps that one connection and is cheap to clone; do NOT open
//! additional connections for writes.

use std::path::Path;
use std::time::Duration;

use comanda_core::ComandaError;
use tracing::debug;

use crate::migrations;

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the application's SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `path` in WAL mode and run migrations.
    pub async fn open(path: &str) -> Result<Self, ComandaError> {
        Self::open_with_options(path, true).await
    }

    /// Open (or create) the database at `path`, choosing the journal mode.
    pub async fn open_with_options(path: &str, wal_mode: bool) -> Result<Self, ComandaError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ComandaError::Storage {
                source: Box::new(e),
            })?;
        }

        // Migrations need a plain `&mut rusqlite::Connection`; run them on a
        // short-lived connection before handing the file to the writer thread.
        let migrate_path = path.to_string();
        let applied = tokio::task::spawn_blocking(move || -> Result<Vec<i32>, ComandaError> {
            let mut conn = rusqlite::Connection::open(&migrate_path).map_err(|e| {
                ComandaError::Storage {
                    source: Box::new(e),
                }
            })?;
            migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| ComandaError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_tr_err)?;

        let journal_mode = if wal_mode { "WAL" } else { "DELETE" };
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path = %path, wal_mode, migrations_applied = applied.len(), "database opened");
        Ok(Self { conn })
    }

    /// Returns the underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Truncate the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), ComandaError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the connection.
    pub async fn close(self) -> Result<(), ComandaError> {
        self.checkpoint().await?;
        self.conn.close().await.map_err(map_tr_err)
    }
}

/// Convert tokio-rusqlite errors to `ComandaError::Storage`.
pub(crate) fn map_tr_err<E: std::fmt::Display>(e: E) -> ComandaError {
    ComandaError::Storage {
        source: format!("database error: {e}").into(),
    }
}
