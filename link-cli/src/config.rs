//! Configuration management for walletlink.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walletlink_client::LinkConfig;
use walletlink_types::ClientMetadataKey;

/// Configuration file looked up in the data directory.
pub const CONFIG_FILE: &str = "walletlink.toml";

/// Load the engine configuration.
///
/// An explicit `--config` path must exist. Otherwise `walletlink.toml` in
/// the data directory is used when present, and defaults when not. A
/// relative database path is resolved against the data directory.
pub fn load(data_dir: &Path, explicit: Option<&Path>) -> Result<LinkConfig> {
    let mut config = match explicit {
        Some(path) => LinkConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let path = data_dir.join(CONFIG_FILE);
            if path.exists() {
                LinkConfig::from_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?
            } else {
                LinkConfig::default()
            }
        }
    };
    config.storage.database = resolve(data_dir, &config.storage.database);
    Ok(config)
}

fn resolve(data_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        data_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Wallet metadata given on the command line.
pub fn wallet_metadata(address: Option<&str>) -> BTreeMap<ClientMetadataKey, String> {
    address
        .map(|address| (ClientMetadataKey::ETHEREUM_ADDRESS, address.to_string()))
        .into_iter()
        .collect()
}
