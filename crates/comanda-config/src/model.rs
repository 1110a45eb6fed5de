// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Comanda platform.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Top-level Comanda configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComandaConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP control surface settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// WhatsApp connection settings.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("comanda").join("comanda.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("comanda.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// HTTP control surface configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Base path under which all actions are served.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Bearer token required on every action. `None` leaves the surface open.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_path", &self.base_path)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            base_path: default_base_path(),
            bearer_token: None,
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/api/whatsapp".to_string()
}

/// WhatsApp connection, session persistence, and recovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    /// Fixed identifier of the persisted session row.
    #[serde(default = "default_session_id")]
    pub session_id: String,

    /// Hex-encoded 32-byte key for session encryption.
    ///
    /// Never serialized back out; normally supplied via `WHATSAPP_ENCRYPTION_KEY`.
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<SecretString>,

    /// WebSocket URL of the messaging bridge.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// HTTP URL that reports the latest protocol version.
    #[serde(default = "default_version_url")]
    pub version_url: String,

    /// Connect at startup instead of waiting for a `connect` action.
    #[serde(default)]
    pub auto_connect: bool,

    /// Reconnect attempts before the connection is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor applied to the delay on each attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any single reconnect delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Period of the connection health check, in seconds.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Connection age after which the health check probes the transport, in seconds.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Upper bound on a single connection attempt, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            session_id: default_session_id(),
            encryption_key: None,
            bridge_url: default_bridge_url(),
            version_url: default_version_url(),
            auto_connect: false,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_session_id() -> String {
    "restaurant-main".to_string()
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:8787/socket".to_string()
}

fn default_version_url() -> String {
    "http://127.0.0.1:8787/version".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    60
}
