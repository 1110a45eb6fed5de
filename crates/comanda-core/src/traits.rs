// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle traits shared by the long-lived services: SQLite storage and
//! the WhatsApp connection manager.

use async_trait::async_trait;

use crate::error::ComandaError;
use crate::types::{AdapterType, HealthStatus};

/// Identity, health and shutdown of a long-lived service.
#[async_trait]
pub trait PluginAdapter: Send + Sync + 'static {
    /// Short name used in logs, e.g. `sqlite` or `whatsapp`.
    fn name(&self) -> &str;

    fn version(&self) -> semver::Version;

    fn adapter_type(&self) -> AdapterType;

    async fn health_check(&self) -> Result<HealthStatus, ComandaError>;

    /// Stop background work and release resources. Must be safe to call
    /// more than once.
    async fn shutdown(&self) -> Result<(), ComandaError>;
}

/// A persistence backend that must be opened before use.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Open the backend and bring its schema up to date.
    async fn initialize(&self) -> Result<(), ComandaError>;

    /// Flush pending writes.
    async fn close(&self) -> Result<(), ComandaError>;
}
