//! List linked sessions.

use anyhow::Result;
use walletlink_client::WalletLink;

/// Run the sessions command.
pub async fn run(engine: &WalletLink) -> Result<()> {
    let sessions = engine.sessions().await?;
    if sessions.is_empty() {
        println!("No linked sessions.");
        println!();
        println!("Run 'walletlink link <payload>' to link a dApp.");
        return Ok(());
    }

    println!("=== {} linked session(s) ===", sessions.len());
    for session in &sessions {
        println!();
        println!("{}", session.id);
        println!("  Name:  {}", session.name);
        println!("  Relay: {}", session.relay_url);
        for (key, value) in &session.metadata {
            println!("  {}: {}", key.as_str(), value);
        }
    }
    Ok(())
}
