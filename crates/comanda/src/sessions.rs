// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `comanda sessions` maintenance commands.
//!
//! Neither command decrypts anything, so both work without the session key.

use comanda_config::model::ComandaConfig;
use comanda_core::ComandaError;
use comanda_storage::{Database, SessionSummary};
use comanda_whatsapp::SessionStore;

async fn open_store(config: &ComandaConfig) -> Result<SessionStore, ComandaError> {
    let db =
        Database::open_with_options(&config.storage.database_path, config.storage.wal_mode).await?;
    Ok(SessionStore::new(db, None))
}

/// `comanda sessions list`
pub async fn list(config: &ComandaConfig) -> Result<(), ComandaError> {
    let store = open_store(config).await?;
    let sessions = store.list_active().await?;
    print!("{}", render_table(&sessions));
    Ok(())
}

/// `comanda sessions clear <id>`
pub async fn clear(config: &ComandaConfig, session_id: &str) -> Result<(), ComandaError> {
    let store = open_store(config).await?;
    store.clear(session_id).await?;
    println!("session '{session_id}' cleared; the next connect will ask for a QR scan");
    Ok(())
}

fn render_table(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "no active sessions\n".to_string();
    }
    let id_width = sessions
        .iter()
        .map(|s| s.session_id.len())
        .max()
        .unwrap_or(0)
        .max("SESSION".len());

    let mut out = format!("{:<id_width$}  {:<15}  UPDATED\n", "SESSION", "PHONE");
    for session in sessions {
        out.push_str(&format!(
            "{:<id_width$}  {:<15}  {}\n",
            session.session_id,
            session.phone_number.as_deref().unwrap_or("-"),
            session.updated_at,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, phone: Option<&str>) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            phone_number: phone.map(str::to_string),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-02T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn empty_table() {
        assert_eq!(render_table(&[]), "no active sessions\n");
    }

    #[test]
    fn table_lists_every_session() {
        let table = render_table(&[
            summary("restaurant-main", Some("5511987654321")),
            summary("filial", None),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("SESSION"));
        assert!(lines[1].contains("5511987654321"));
        assert!(lines[2].starts_with("filial"));
        assert!(lines[2].contains(" - "));
    }
}
