// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for storage entities.

use serde::Serialize;

/// A `whatsapp_sessions` row.
///
/// `encrypted_payload` is opaque to this crate: hex-encoded
/// `nonce ‖ ciphertext ‖ tag` produced by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub session_id: String,
    pub encrypted_payload: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload-free view of an active session, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub phone_number: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
