// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session encryption key handling.

use comanda_core::ComandaError;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

/// Length of the raw key in bytes.
pub const KEY_LEN: usize = 32;

/// A 256-bit session encryption key, zeroed on drop.
///
/// Debug output never includes key material.
#[derive(Clone)]
pub struct SessionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl SessionKey {
    /// Parse a key from 64 hex characters.
    pub fn from_hex(hex_key: &str) -> Result<Self, ComandaError> {
        let hex_key = hex_key.trim();
        if hex_key.len() != KEY_LEN * 2 {
            return Err(ComandaError::Encryption(format!(
                "encryption key must be {} hex characters, got {}",
                KEY_LEN * 2,
                hex_key.len()
            )));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        hex::decode_to_slice(hex_key, bytes.as_mut_slice())
            .map_err(|e| ComandaError::Encryption(format!("encryption key is not valid hex: {e}")))?;
        Ok(Self { bytes })
    }

    /// Parse a key held in configuration.
    pub fn from_secret(secret: &SecretString) -> Result<Self, ComandaError> {
        Self::from_hex(secret.expose_secret())
    }

    /// Generate a random key from the system CSPRNG.
    pub fn generate() -> Result<Self, ComandaError> {
        let rng = SystemRandom::new();
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rng.fill(bytes.as_mut_slice())
            .map_err(|_| ComandaError::Encryption("failed to generate random key".to_string()))?;
        Ok(Self { bytes })
    }

    /// Hex form of the key, for `comanda keygen` output.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes.as_slice()))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// Mask a sensitive value for logs, showing at most 4 chars at each end.
pub fn mask_secret(value: &str) -> String {
    if value.len() < 10 || !value.is_ascii() {
        return "****".to_string();
    }
    let prefix = &value[..4];
    let suffix = &value[value.len() - 4..];
    format!("{prefix}...{suffix}")
}
