// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schema migrations embedded from `migrations/` with refinery.

use comanda_core::ComandaError;
use tracing::info;

refinery::embed_migrations!("migrations");

/// Bring the schema up to date. Returns the versions applied by this call,
/// which is empty when the database was already current.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<Vec<i32>, ComandaError> {
    let report = migrations::runner()
        .run(conn)
        .map_err(|e| ComandaError::Storage { source: e.into() })?;

    let applied: Vec<i32> = report
        .applied_migrations()
        .iter()
        .map(|m| m.version())
        .collect();
    for migration in report.applied_migrations() {
        info!(version = migration.version(), name = migration.name(), "applied migration");
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_sessions_table_once() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), vec![1]);
        assert!(run_migrations(&mut conn).unwrap().is_empty());

        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('whatsapp_sessions')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for expected in ["session_id", "encrypted_payload", "phone_number", "is_active"] {
            assert!(columns.iter().any(|c| c == expected), "missing column {expected}");
        }
    }
}
