// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted persistence of WhatsApp session credentials.

use std::sync::Arc;

use comanda_config::model::WhatsAppConfig;
use comanda_core::ComandaError;
use comanda_storage::queries::whatsapp_sessions;
use comanda_storage::{Database, PersistedSession, SessionSummary};
use comanda_vault::{mask_secret, open_hex, seal_hex, SessionKey};
use tracing::debug;

use crate::auth_state::SessionData;

/// A decrypted session row.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub data: SessionData,
    pub phone_number: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Session rows sealed with AES-256-GCM.
///
/// Cheap to clone. Operations that touch ciphertext fail with
/// [`ComandaError::Encryption`] when no key is configured.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    key: Option<Arc<SessionKey>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(db: Database, key: Option<SessionKey>) -> Self {
        Self {
            db,
            key: key.map(Arc::new),
        }
    }

    /// Build a store from the `[whatsapp]` section. A key that is present
    /// but malformed is rejected here.
    pub fn from_config(db: Database, config: &WhatsAppConfig) -> Result<Self, ComandaError> {
        let key = config
            .encryption_key
            .as_ref()
            .map(SessionKey::from_secret)
            .transpose()?;
        Ok(Self::new(db, key))
    }

    fn key(&self) -> Result<&SessionKey, ComandaError> {
        self.key.as_deref().ok_or_else(|| {
            ComandaError::Encryption(
                "WHATSAPP_ENCRYPTION_KEY is not configured".to_string(),
            )
        })
    }

    /// Encrypt and upsert `data`, marking the row active.
    pub async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        phone_number: Option<&str>,
    ) -> Result<PersistedSession, ComandaError> {
        let key = self.key()?;
        let plaintext = serde_json::to_vec(data)
            .map_err(|e| ComandaError::Internal(format!("failed to serialize session: {e}")))?;
        let payload = seal_hex(key, &plaintext)?;
        let row =
            whatsapp_sessions::upsert_session(&self.db, session_id, &payload, phone_number).await?;
        let masked = row.phone_number.as_deref().map(mask_secret);
        debug!(session_id, phone = ?masked, "session saved");
        Ok(row)
    }

    /// Load and decrypt the active row, or `None` when there is none.
    pub async fn load(&self, session_id: &str) -> Result<Option<LoadedSession>, ComandaError> {
        let key = self.key()?;
        let Some(row) = whatsapp_sessions::get_active_session(&self.db, session_id).await? else {
            return Ok(None);
        };
        let plaintext = open_hex(key, &row.encrypted_payload)?;
        let data: SessionData = serde_json::from_slice(&plaintext).map_err(|e| {
            ComandaError::Decryption(format!("decrypted payload is not a session: {e}"))
        })?;
        Ok(Some(LoadedSession {
            data,
            phone_number: row.phone_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    /// Soft-delete the row. Clearing a missing or inactive row is a no-op.
    pub async fn clear(&self, session_id: &str) -> Result<(), ComandaError> {
        let changed = whatsapp_sessions::deactivate_session(&self.db, session_id).await?;
        debug!(session_id, changed, "session cleared");
        Ok(())
    }

    /// Active sessions, most recently updated first.
    pub async fn list_active(&self) -> Result<Vec<SessionSummary>, ComandaError> {
        whatsapp_sessions::list_active_sessions(&self.db).await
    }

    /// Raw row access for maintenance and tests.
    pub fn database(&self) -> &Database {
        &self.db
    }
}
