//! Set metadata exposed to linked hosts.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use walletlink_client::WalletLink;
use walletlink_types::{ClientMetadataKey, SessionId};

use super::ONLINE_TIMEOUT;

/// Run the set-metadata command.
pub async fn run(engine: &WalletLink, key: &str, value: &str, session: Option<&str>) -> Result<()> {
    let key = ClientMetadataKey::new(key).context("Invalid metadata key")?;

    engine.connect(BTreeMap::new()).await?;
    let online = engine.wait_connected(ONLINE_TIMEOUT).await.is_ok();

    match session {
        Some(session) => {
            let session_id = SessionId::new(session).context("Invalid session id")?;
            engine
                .set_session_metadata(&session_id, key.clone(), value)
                .await
                .with_context(|| format!("Failed to update {}", session_id))?;
            println!("Set {} for session {}.", key.as_str(), session_id);
        }
        None => {
            engine
                .set_metadata(key.clone(), value)
                .await
                .context("Failed to update sessions")?;
            println!("Set {} for all sessions.", key.as_str());
        }
    }
    if !online {
        println!("Relay offline: the value is saved and will sync on the next connection.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[tokio::test]
    async fn sets_metadata_on_all_sessions() {
        let (engine, _) = testing::linked_engine("S1").await;

        run(&engine, "EthereumAddress", "0xfeed", None).await.unwrap();

        let session = engine.session(&SessionId::new("S1").unwrap()).unwrap();
        assert_eq!(
            session.metadata.get(&ClientMetadataKey::ETHEREUM_ADDRESS).map(String::as_str),
            Some("0xfeed")
        );
    }

    #[tokio::test]
    async fn rejects_bad_key_and_unknown_session() {
        let (engine, _) = testing::linked_engine("S1").await;
        assert!(run(&engine, "bad key!", "x", None).await.is_err());
        assert!(run(&engine, "EthereumAddress", "x", Some("S404")).await.is_err());
    }
}
