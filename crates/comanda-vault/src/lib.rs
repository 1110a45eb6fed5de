// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM session envelope for the Comanda platform.
//!
//! Session credentials are sealed under an operator-supplied 32-byte key
//! with a fresh 128-bit nonce per call and a fixed associated-data context.
//! The stored form is lowercase hex of `nonce ‖ ciphertext ‖ tag`.

pub mod crypto;
pub mod key;

pub use crypto::{open_hex, seal_hex, SESSION_AAD};
pub use key::{mask_secret, SessionKey};
