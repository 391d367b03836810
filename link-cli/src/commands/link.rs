//! Link a dApp session.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use walletlink_client::WalletLink;
use walletlink_types::ClientMetadataKey;

/// Run the link command.
pub async fn run(
    engine: &WalletLink,
    payload: &str,
    metadata: BTreeMap<ClientMetadataKey, String>,
) -> Result<()> {
    engine.connect(BTreeMap::new()).await?;
    let session = engine
        .link_payload(payload, metadata)
        .await
        .context("Failed to link session")?;

    println!("Session linked!");
    println!();
    println!("  Session: {}", session.id);
    println!("  Name:    {}", session.name);
    println!("  Relay:   {}", session.relay_url);
    println!();
    println!("Next steps:");
    println!("  walletlink listen --address <your address>");

    Ok(())
}
