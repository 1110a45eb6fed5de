// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted WhatsApp session operations.
//!
//! Rows are keyed by `session_id`; the upsert keeps at most one row (and so
//! at most one active row) per id. Clearing flips `is_active` and forgets
//! the phone number.

use comanda_core::ComandaError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{PersistedSession, SessionSummary};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<PersistedSession, rusqlite::Error> {
    Ok(PersistedSession {
        session_id: row.get(0)?,
        encrypted_payload: row.get(1)?,
        phone_number: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Insert or replace the payload for `session_id` and mark it active.
///
/// An absent `phone_number` keeps whatever number the row already had.
pub async fn upsert_session(
    db: &Database,
    session_id: &str,
    encrypted_payload: &str,
    phone_number: Option<&str>,
) -> Result<PersistedSession, ComandaError> {
    let session_id = session_id.to_string();
    let payload = encrypted_payload.to_string();
    let phone = phone_number.map(str::to_string);
    let sql = format!(
        "INSERT INTO whatsapp_sessions (session_id, encrypted_payload, phone_number, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, {NOW}, {NOW})
         ON CONFLICT(session_id) DO UPDATE SET
             encrypted_payload = excluded.encrypted_payload,
             phone_number = COALESCE(excluded.phone_number, whatsapp_sessions.phone_number),
             is_active = 1,
             updated_at = {NOW}
         RETURNING session_id, encrypted_payload, phone_number, is_active, created_at, updated_at"
    );
    db.connection()
        .call(move |conn| -> Result<PersistedSession, rusqlite::Error> {
            conn.query_row(&sql, params![session_id, payload, phone], row_to_session)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch the active row for `session_id`, if any.
pub async fn get_active_session(
    db: &Database,
    session_id: &str,
) -> Result<Option<PersistedSession>, ComandaError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<PersistedSession>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT session_id, encrypted_payload, phone_number, is_active, created_at, updated_at
                 FROM whatsapp_sessions WHERE session_id = ?1 AND is_active = 1",
            )?;
            match stmt.query_row(params![session_id], row_to_session) {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Soft-delete the row for `session_id` and drop its phone number, so a
/// later pairing never inherits it. Returns the number of rows changed.
pub async fn deactivate_session(db: &Database, session_id: &str) -> Result<usize, ComandaError> {
    let session_id = session_id.to_string();
    let sql = format!(
        "UPDATE whatsapp_sessions SET is_active = 0, phone_number = NULL, updated_at = {NOW}
         WHERE session_id = ?1 AND is_active = 1"
    );
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(&sql, params![session_id])
        })
        .await
        .map_err(map_tr_err)
}

/// List active sessions, most recently updated first.
pub async fn list_active_sessions(db: &Database) -> Result<Vec<SessionSummary>, ComandaError> {
    db.connection()
        .call(|conn| -> Result<Vec<SessionSummary>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT session_id, phone_number, created_at, updated_at
                 FROM whatsapp_sessions WHERE is_active = 1
                 ORDER BY updated_at DESC, session_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    phone_number: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }
            Ok(sessions)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn upsert_then_get_returns_active_row() {
        let (db, _dir) = setup_db().await;

        let saved = upsert_session(&db, "main", "deadbeef", Some("5511987654321"))
            .await
            .unwrap();
        assert!(saved.is_active);
        assert_eq!(saved.phone_number.as_deref(), Some("5511987654321"));

        let loaded = get_active_session(&db, "main").await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_session_returns_none() {
        let (db, _dir) = setup_db().await;
        assert!(get_active_session(&db, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_payload_and_keeps_created_at() {
        let (db, _dir) = setup_db().await;

        let first = upsert_session(&db, "main", "aa", Some("5511900000000"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = upsert_session(&db, "main", "bb", None).await.unwrap();

        assert_eq!(second.encrypted_payload, "bb");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        // Absent phone keeps the stored number.
        assert_eq!(second.phone_number.as_deref(), Some("5511900000000"));
    }

    #[tokio::test]
    async fn deactivate_hides_row_and_is_idempotent() {
        let (db, _dir) = setup_db().await;
        upsert_session(&db, "main", "aa", None).await.unwrap();

        assert_eq!(deactivate_session(&db, "main").await.unwrap(), 1);
        assert!(get_active_session(&db, "main").await.unwrap().is_none());
        assert_eq!(deactivate_session(&db, "main").await.unwrap(), 0);
        assert_eq!(deactivate_session(&db, "never-existed").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_reactivates_cleared_row() {
        let (db, _dir) = setup_db().await;
        upsert_session(&db, "main", "aa", None).await.unwrap();
        deactivate_session(&db, "main").await.unwrap();

        let revived = upsert_session(&db, "main", "cc", None).await.unwrap();
        assert!(revived.is_active);
        assert!(get_active_session(&db, "main").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn new_pairing_after_clear_does_not_inherit_phone() {
        let (db, _dir) = setup_db().await;
        upsert_session(&db, "main", "aa", Some("5511987654321"))
            .await
            .unwrap();
        deactivate_session(&db, "main").await.unwrap();

        let repaired = upsert_session(&db, "main", "bb", None).await.unwrap();
        assert!(repaired.phone_number.is_none());
        let active = get_active_session(&db, "main").await.unwrap().unwrap();
        assert!(active.phone_number.is_none());
        assert_eq!(active.encrypted_payload, "bb");
    }

    #[tokio::test]
    async fn list_active_orders_by_updated_desc() {
        let (db, _dir) = setup_db().await;
        upsert_session(&db, "a", "01", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        upsert_session(&db, "b", "02", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        upsert_session(&db, "c", "03", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        upsert_session(&db, "a", "04", None).await.unwrap();
        deactivate_session(&db, "b").await.unwrap();

        let ids: Vec<String> = list_active_sessions(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
