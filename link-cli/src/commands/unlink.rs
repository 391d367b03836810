//! Unlink a session.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::warn;
use walletlink_client::WalletLink;
use walletlink_types::SessionId;

use super::ONLINE_TIMEOUT;

/// Run the unlink command.
pub async fn run(engine: &WalletLink, session: &str) -> Result<()> {
    let session_id = SessionId::new(session).context("Invalid session id")?;

    // Unsubscribing is best effort; the local record goes either way.
    engine.connect(BTreeMap::new()).await?;
    if let Err(e) = engine.wait_connected(ONLINE_TIMEOUT).await {
        warn!("Relay unreachable, unlinking locally only: {}", e);
    }

    engine
        .unlink(&session_id)
        .await
        .with_context(|| format!("Failed to unlink {}", session_id))?;
    println!("Session {} unlinked.", session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[tokio::test]
    async fn unlink_removes_session() {
        let (engine, connector) = testing::linked_engine("S1").await;

        run(&engine, "S1").await.unwrap();

        assert!(engine.sessions().await.unwrap().is_empty());
        assert!(connector.mock(testing::RELAY).subscriptions().is_empty());
    }

    #[tokio::test]
    async fn unlink_unknown_session_fails() {
        let (engine, _) = testing::engine().await;
        assert!(run(&engine, "S404").await.is_err());
    }
}
