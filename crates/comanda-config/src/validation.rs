// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Checks that serde cannot express: non-empty strings, key format, and the
//! ordering between retry delays.

use secrecy::ExposeSecret;

use crate::diagnostic::ConfigError;
use crate::model::ComandaConfig;

/// Length in hex characters of a 32-byte session key.
const ENCRYPTION_KEY_HEX_LEN: usize = 64;

#[derive(Default)]
struct Checks(Vec<ConfigError>);

impl Checks {
    fn require(&mut self, ok: bool, key: &str, message: impl FnOnce() -> String) {
        if !ok {
            self.0.push(ConfigError::validation(key, message()));
        }
    }

    fn not_blank(&mut self, key: &str, value: &str) {
        self.require(!value.trim().is_empty(), key, || "must not be empty".to_string());
    }
}

/// Validate a deserialized configuration.
///
/// Every failed check is reported, not just the first.
pub fn validate_config(config: &ComandaConfig) -> Result<(), Vec<ConfigError>> {
    let mut checks = Checks::default();
    let gateway = &config.gateway;
    let wa = &config.whatsapp;

    checks.not_blank("storage.database_path", &config.storage.database_path);
    checks.not_blank("gateway.host", &gateway.host);
    checks.require(gateway.base_path.starts_with('/'), "gateway.base_path", || {
        format!("must start with `/`, got `{}`", gateway.base_path)
    });
    if let Some(token) = &gateway.bearer_token {
        checks.not_blank("gateway.bearer_token", token);
    }

    checks.not_blank("whatsapp.session_id", &wa.session_id);

    // A missing key is allowed here; it surfaces when the session store is used.
    if let Some(key) = &wa.encryption_key {
        let key = key.expose_secret();
        let well_formed =
            key.len() == ENCRYPTION_KEY_HEX_LEN && key.bytes().all(|b| b.is_ascii_hexdigit());
        checks.require(well_formed, "whatsapp.encryption_key", || {
            format!(
                "must be {ENCRYPTION_KEY_HEX_LEN} hex characters (32 bytes), got {} characters",
                key.len()
            )
        });
    }

    checks.require(wa.max_retries >= 1, "whatsapp.max_retries", || {
        "must be at least 1".to_string()
    });
    checks.require(wa.backoff_multiplier >= 1.0, "whatsapp.backoff_multiplier", || {
        format!("must be at least 1.0, got {}", wa.backoff_multiplier)
    });
    checks.require(wa.base_delay_ms <= wa.max_delay_ms, "whatsapp.base_delay_ms", || {
        format!(
            "{} exceeds whatsapp.max_delay_ms ({})",
            wa.base_delay_ms, wa.max_delay_ms
        )
    });
    for (key, secs) in [
        ("whatsapp.health_check_interval_secs", wa.health_check_interval_secs),
        ("whatsapp.stale_after_secs", wa.stale_after_secs),
        ("whatsapp.connect_timeout_secs", wa.connect_timeout_secs),
    ] {
        checks.require(secs > 0, key, || "must be greater than 0".to_string());
    }

    match checks.0 {
        errors if errors.is_empty() => Ok(()),
        errors => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn keys(errors: &[ConfigError]) -> Vec<&str> {
        errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::Validation { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ComandaConfig::default()).is_ok());
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let mut config = ComandaConfig::default();
        config.whatsapp.encryption_key = Some(SecretString::from("abcd".to_string()));
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(keys(&errors), ["whatsapp.encryption_key"]);
        assert!(errors[0].to_string().contains("64 hex characters"));
        assert!(!errors[0].to_string().contains("abcd"));
    }

    #[test]
    fn non_hex_encryption_key_is_rejected() {
        let mut config = ComandaConfig::default();
        config.whatsapp.encryption_key = Some(SecretString::from("z".repeat(64)));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn valid_encryption_key_is_accepted() {
        let mut config = ComandaConfig::default();
        config.whatsapp.encryption_key = Some(SecretString::from("0f".repeat(32)));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn blank_bearer_token_is_rejected() {
        let mut config = ComandaConfig::default();
        config.gateway.bearer_token = Some("  ".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(keys(&errors), ["gateway.bearer_token"]);
    }

    #[test]
    fn collects_all_errors() {
        let mut config = ComandaConfig::default();
        config.whatsapp.session_id = "  ".to_string();
        config.whatsapp.max_retries = 0;
        config.whatsapp.backoff_multiplier = 0.5;
        config.whatsapp.base_delay_ms = 90_000;
        config.gateway.base_path = "api".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            keys(&errors),
            [
                "gateway.base_path",
                "whatsapp.session_id",
                "whatsapp.max_retries",
                "whatsapp.backoff_multiplier",
                "whatsapp.base_delay_ms",
            ]
        );
    }
}
