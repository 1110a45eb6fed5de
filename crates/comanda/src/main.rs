// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Comanda - WhatsApp connection service for restaurant order notifications.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod sessions;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comanda_vault::SessionKey;

/// Comanda - WhatsApp connection service for restaurant order notifications.
#[derive(Parser, Debug)]
#[command(name = "comanda", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the WhatsApp connection manager and its HTTP control surface.
    Serve,
    /// Inspect or clear persisted WhatsApp sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
    /// Print a fresh random session encryption key (64 hex characters).
    Keygen,
}

/// `comanda sessions` subcommands.
#[derive(Subcommand, Debug)]
enum SessionsCommand {
    /// List active sessions, most recently updated first.
    List,
    /// Deactivate a session so the next connect asks for a new QR scan.
    Clear {
        /// Session identifier, e.g. `restaurant-main`.
        session_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Key generation needs no configuration.
    if let Some(Commands::Keygen) = cli.command {
        match SessionKey::generate() {
            Ok(key) => println!("{}", key.to_hex().as_str()),
            Err(e) => {
                eprintln!("comanda: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let loaded = match &cli.config {
        Some(path) => comanda_config::load_and_validate_path(path),
        None => comanda_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            comanda_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Sessions { action }) => match action {
            SessionsCommand::List => sessions::list(&config).await,
            SessionsCommand::Clear { session_id } => sessions::clear(&config, &session_id).await,
        },
        Some(Commands::Keygen) => Ok(()),
        None => {
            println!("comanda: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("comanda: {e}");
        std::process::exit(1);
    }
}
