//! # walletlink
//!
//! CLI wallet for testing the WalletLink protocol.
//!
//! ## Commands
//!
//! - `link`: Link a dApp session from a pairing payload
//! - `unlink`: Unlink a session
//! - `sessions`: List linked sessions
//! - `set-metadata`: Set a value exposed to hosts
//! - `listen`: Print incoming host requests
//! - `fetch`: Fetch one request by event id
//!
//! ## Example
//!
//! ```bash
//! # Link the dApp whose QR code you scanned
//! walletlink link eyJ2ZXJzaW9uIjoxLCJzZXNzaW9uX2lkIjoi...
//!
//! # Watch requests, rejecting each one
//! walletlink listen --address 0xabc... --auto-reject
//!
//! # Fetch a request named by a push notification
//! walletlink fetch --session 7a3f... --event 51c2...
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walletlink_client::WalletLink;

mod commands;
mod config;

use commands::listen::ListenOptions;
use commands::{fetch, link, listen, metadata, sessions, unlink};

/// CLI wallet for testing the WalletLink protocol.
#[derive(Parser, Debug)]
#[command(name = "walletlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the session database and configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: walletlink.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Link a dApp session from a scanned pairing payload
    Link {
        /// Pairing payload (base64 QR contents)
        payload: String,

        /// Ethereum address to expose to the dApp
        #[arg(long)]
        address: Option<String>,
    },

    /// Unlink a session
    Unlink {
        /// Session id
        session_id: String,
    },

    /// List linked sessions
    Sessions,

    /// Set a metadata value exposed to hosts
    SetMetadata {
        /// Metadata key (e.g. EthereumAddress)
        key: String,

        /// Value
        value: String,

        /// Only update this session
        #[arg(long)]
        session: Option<String>,
    },

    /// Connect and print incoming host requests
    Listen {
        /// Reject every request as it arrives
        #[arg(long)]
        auto_reject: bool,

        /// Ethereum address to expose to every session
        #[arg(long)]
        address: Option<String>,

        /// Stop after this many requests
        #[arg(long)]
        count: Option<usize>,
    },

    /// Fetch one request by event id
    Fetch {
        /// Session id
        #[arg(long)]
        session: String,

        /// Event id
        #[arg(long)]
        event: String,

        /// Relay URL (default: the session's relay)
        #[arg(long)]
        relay: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let config = config::load(&data_dir, cli.config.as_deref())?;
    let engine = WalletLink::open(config)
        .await
        .context("Failed to open session database")?;

    match cli.command {
        Commands::Link { payload, address } => {
            link::run(&engine, &payload, config::wallet_metadata(address.as_deref())).await?;
        }
        Commands::Unlink { session_id } => {
            unlink::run(&engine, &session_id).await?;
        }
        Commands::Sessions => {
            sessions::run(&engine).await?;
        }
        Commands::SetMetadata {
            key,
            value,
            session,
        } => {
            metadata::run(&engine, &key, &value, session.as_deref()).await?;
        }
        Commands::Listen {
            auto_reject,
            address,
            count,
        } => {
            let options = ListenOptions { auto_reject, count };
            listen::run(&engine, config::wallet_metadata(address.as_deref()), options).await?;
        }
        Commands::Fetch {
            session,
            event,
            relay,
        } => {
            fetch::run(&engine, &session, &event, relay.as_deref()).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for walletlink.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "walletlink", "walletlink")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_listen_flags() {
        let cli = Cli::parse_from([
            "walletlink",
            "--data-dir",
            "/tmp/wl",
            "listen",
            "--auto-reject",
            "--count",
            "3",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/wl")));
        assert!(matches!(
            cli.command,
            Commands::Listen {
                auto_reject: true,
                count: Some(3),
                ..
            }
        ));
    }
}
