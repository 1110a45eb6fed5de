// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Comanda WhatsApp service.
//!
//! Values come from compiled defaults, `comanda.toml` files, `COMANDA_*`
//! environment variables and `WHATSAPP_ENCRYPTION_KEY`, in that order of
//! precedence. Unknown keys are rejected and every error is returned as a
//! miette diagnostic.
//!
//! ```no_run
//! let config = comanda_config::load_and_validate().expect("config errors");
//! println!("listening on {}:{}", config.gateway.host, config.gateway.port);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ComandaConfig;

/// Load from the standard file hierarchy plus the environment, then validate.
pub fn load_and_validate() -> Result<ComandaConfig, Vec<ConfigError>> {
    let sources = loader::config_files()
        .iter()
        .filter_map(|path| read_source(path))
        .collect::<Vec<_>>();
    finish(loader::load_config(), &sources)
}

/// Load a single file plus the environment, then validate.
pub fn load_and_validate_path(path: &Path) -> Result<ComandaConfig, Vec<ConfigError>> {
    let sources = read_source(path).into_iter().collect::<Vec<_>>();
    finish(loader::load_config_from_path(path), &sources)
}

/// Load from a TOML string only, then validate.
pub fn load_and_validate_str(toml_content: &str) -> Result<ComandaConfig, Vec<ConfigError>> {
    let sources = [("<inline>".to_string(), toml_content.to_string())];
    finish(loader::load_config_from_str(toml_content), &sources)
}

fn finish(
    loaded: Result<ComandaConfig, figment::Error>,
    sources: &[(String, String)],
) -> Result<ComandaConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::figment_to_config_errors(err, sources))?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// `(absolute path, content)` of a config file, if it can be read.
///
/// Figment reports file sources by absolute path, so relative paths are
/// resolved against the working directory to match.
fn read_source(path: &Path) -> Option<(String, String)> {
    let content = std::fs::read_to_string(path).ok()?;
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Some((absolute.display().to_string(), content))
}
