// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Comanda platform.

use thiserror::Error;

/// The primary error type used across all Comanda crates.
#[derive(Debug, Error)]
pub enum ComandaError {
    /// Configuration errors (missing or malformed settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The session key is absent or unusable, or sealing failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Ciphertext failed authentication or could not be decoded.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// An operation needed a live messaging connection and there was none.
    #[error("WhatsApp is not connected")]
    NotConnected,

    /// Messaging socket or transport errors.
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Caller supplied invalid input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ComandaError {
    /// Shorthand for a channel error without an underlying source.
    pub fn channel(message: impl Into<String>) -> Self {
        ComandaError::Channel {
            message: message.into(),
            source: None,
        }
    }
}
