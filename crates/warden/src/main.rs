// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Warden - multi-tenant chat-server moderation engine.
//!
//! This is the binary entry point for the Warden engine.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, Subcommand};

mod doctor;
mod serve;

/// Warden - multi-tenant chat-server moderation engine.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the engine.
    Serve {
        /// Replay normalized events from a JSONL file instead of a live
        /// gateway (development harness).
        #[arg(long)]
        replay: Option<String>,
    },
    /// Check configuration, storage health, and migration state.
    Doctor,
    /// Inspect or manage configuration and per-tenant records.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective process configuration.
    Show,
    /// Read a per-tenant record.
    Get { tenant: u64, namespace: String, key: String },
    /// Write a per-tenant record (value is JSON text).
    Set { tenant: u64, namespace: String, key: String, value: String },
    /// Delete a per-tenant record.
    Delete { tenant: u64, namespace: String, key: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load and validate configuration at startup.
    let config = match warden_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            warden_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve { replay }) => serve::run_serve_cli(config, replay).await,
        Some(Commands::Doctor) => doctor::run_doctor(config).await,
        Some(Commands::Config { command }) => run_config(config, command).await,
        None => {
            println!("warden: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// The `warden config` surface: effective config plus the per-tenant record
/// administration the engine's features read.
async fn run_config(
    config: warden_config::WardenConfig,
    command: ConfigCommands,
) -> Result<(), warden_core::WardenError> {
    use warden_core::{Store, TenantId};
    use warden_storage::{Database, SqliteStore};

    if let ConfigCommands::Show = command {
        println!("{}", render_config(&config));
        return Ok(());
    }

    let db = Database::open(&config.storage.database_path).await?;
    let store = SqliteStore::new(db.clone());

    match command {
        ConfigCommands::Show => unreachable!(),
        ConfigCommands::Get { tenant, namespace, key } => {
            match store.get(TenantId(tenant), &namespace, &key).await? {
                Some(value) => println!("{value}"),
                None => println!("(absent)"),
            }
        }
        ConfigCommands::Set { tenant, namespace, key, value } => {
            // Reject records that aren't valid JSON before they can poison
            // a feature namespace.
            serde_json::from_str::<serde_json::Value>(&value).map_err(|e| {
                warden_core::WardenError::Internal(format!("value is not valid JSON: {e}"))
            })?;
            store.put(TenantId(tenant), &namespace, &key, &value).await?;
            println!("ok");
        }
        ConfigCommands::Delete { tenant, namespace, key } => {
            store.delete(TenantId(tenant), &namespace, &key).await?;
            println!("ok");
        }
    }
    db.close().await
}

fn render_config(config: &warden_config::WardenConfig) -> String {
    // Serialization of the config model cannot fail; fall back to debug
    // formatting just in case.
    serde_json::to_string_pretty(config).unwrap_or_else(|_| format!("{config:#?}"))
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Verify jemalloc is the global allocator by advancing the epoch.
        // Only jemalloc supports this -- the system allocator would fail.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0);
    }

    #[test]
    fn cli_parses_serve_with_replay() {
        use super::*;
        let cli = Cli::parse_from(["warden", "serve", "--replay", "events.jsonl"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Serve { replay: Some(path) }) if path == "events.jsonl"
        ));
    }

    #[test]
    fn cli_parses_config_set() {
        use super::*;
        let cli = Cli::parse_from([
            "warden", "config", "set", "42", "levels.settings", "config", "{}",
        ]);
        assert!(matches!(
            cli.command,
            Some(Commands::Config { command: ConfigCommands::Set { tenant: 42, .. } })
        ));
    }
}
