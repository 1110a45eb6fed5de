// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM seal/open with a 128-bit nonce.
//!
//! Every call to [`seal`] draws a fresh random nonce from the system CSPRNG.
//! Nonce reuse under one key would be catastrophic for GCM security.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use comanda_core::ComandaError;
use ring::rand::{SecureRandom, SystemRandom};

use crate::key::SessionKey;

/// AES-256-GCM with a 16-byte nonce and the standard 16-byte tag.
type SessionCipher = AesGcm<Aes256, U16>;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Associated data binding ciphertexts to persisted WhatsApp sessions.
pub const SESSION_AAD: &[u8] = b"whatsapp-session";

fn cipher(key: &SessionKey) -> Result<SessionCipher, ComandaError> {
    SessionCipher::new_from_slice(key.as_bytes())
        .map_err(|_| ComandaError::Encryption("failed to create AES-256-GCM key".to_string()))
}

/// Encrypt `plaintext`, returning `nonce ‖ ciphertext ‖ tag`.
pub fn seal(key: &SessionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, ComandaError> {
    let cipher = cipher(key)?;

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| ComandaError::Encryption("failed to generate random nonce".to_string()))?;

    let ciphertext = cipher
        .encrypt(
            Nonce::<U16>::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| ComandaError::Encryption("AES-256-GCM encryption failed".to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`seal`].
///
/// Fails with [`ComandaError::Decryption`] when the envelope is truncated or
/// the tag does not verify under `key` and `aad`.
pub fn open(key: &SessionKey, envelope: &[u8], aad: &[u8]) -> Result<Vec<u8>, ComandaError> {
    if envelope.len() < NONCE_LEN + TAG_LEN {
        return Err(ComandaError::Decryption(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }
    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
    cipher(key)?
        .decrypt(
            Nonce::<U16>::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| {
            ComandaError::Decryption(
                "authentication failed -- wrong key, tampered data, or context mismatch"
                    .to_string(),
            )
        })
}

/// Seal under [`SESSION_AAD`] and hex-encode.
pub fn seal_hex(key: &SessionKey, plaintext: &[u8]) -> Result<String, ComandaError> {
    seal(key, plaintext, SESSION_AAD).map(hex::encode)
}

/// Hex-decode and open under [`SESSION_AAD`].
pub fn open_hex(key: &SessionKey, encoded: &str) -> Result<Vec<u8>, ComandaError> {
    let envelope = hex::decode(encoded)
        .map_err(|e| ComandaError::Decryption(format!("stored payload is not valid hex: {e}")))?;
    open(key, &envelope, SESSION_AAD)
}
