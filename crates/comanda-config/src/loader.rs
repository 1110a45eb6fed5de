// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./comanda.toml` > `~/.config/comanda/comanda.toml` > `/etc/comanda/comanda.toml`
//! with environment variable overrides via the `COMANDA_` prefix, plus the
//! unprefixed `WHATSAPP_ENCRYPTION_KEY` used by existing deployments.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::ComandaConfig;

/// Raw environment variable carrying the hex-encoded session encryption key.
pub const ENCRYPTION_KEY_ENV: &str = "WHATSAPP_ENCRYPTION_KEY";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/comanda/comanda.toml`
/// 3. `~/.config/comanda/comanda.toml`
/// 4. `./comanda.toml`
/// 5. `COMANDA_*` environment variables
/// 6. `WHATSAPP_ENCRYPTION_KEY`
pub fn load_config() -> Result<ComandaConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<ComandaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ComandaConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ComandaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ComandaConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .merge(encryption_key_provider())
        .extract()
}

/// Config files in merge order, lowest precedence first.
pub fn config_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from("/etc/comanda/comanda.toml")];
    if let Some(dir) = dirs::config_dir() {
        files.push(dir.join("comanda/comanda.toml"));
    }
    files.push(PathBuf::from("comanda.toml"));
    files
}

/// Build the Figment used for config loading, before extraction.
pub fn build_figment() -> Figment {
    let figment = config_files()
        .into_iter()
        .fold(Figment::new().merge(Serialized::defaults(ComandaConfig::default())), |f, path| {
            f.merge(Toml::file(path))
        });
    figment.merge(env_provider()).merge(encryption_key_provider())
}

/// Environment provider with explicit section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `COMANDA_WHATSAPP_MAX_RETRIES` must map to
/// `whatsapp.max_retries`, not `whatsapp.max.retries`.
fn env_provider() -> Env {
    Env::prefixed("COMANDA_").map(|key| env_key_to_path(key.as_str()).into())
}

const SECTIONS: [&str; 4] = ["log", "storage", "gateway", "whatsapp"];

/// `WHATSAPP_MAX_RETRIES` -> `whatsapp.max_retries`. Figment hands the key
/// over in its original case, so it is lowercased first.
fn env_key_to_path(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in SECTIONS {
        if let Some(field) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{field}");
        }
    }
    key
}

fn encryption_key_provider() -> Env {
    Env::raw()
        .only(&[ENCRYPTION_KEY_ENV])
        .map(|_| "whatsapp.encryption_key".into())
}
