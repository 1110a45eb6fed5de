// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error type, health reporting and service lifecycle traits shared by the
//! Comanda crates.

pub mod error;
pub mod traits;
pub mod types;

pub use error::ComandaError;
pub use traits::{PluginAdapter, StorageAdapter};
pub use types::{AdapterType, HealthStatus};
