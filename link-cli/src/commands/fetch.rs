//! Fetch one host request by event id.

use anyhow::{Context, Result};
use walletlink_client::WalletLink;
use walletlink_types::{EventId, SessionId};

use super::print_request;

/// Run the fetch command.
pub async fn run(
    engine: &WalletLink,
    session: &str,
    event: &str,
    relay: Option<&str>,
) -> Result<()> {
    let session_id = SessionId::new(session).context("Invalid session id")?;
    let event_id = EventId::new(event).context("Invalid event id")?;
    let relay_url = match relay {
        Some(relay) => relay.to_string(),
        None => engine
            .session(&session_id)
            .map(|session| session.relay_url)
            .with_context(|| format!("Session {} is not linked", session_id))?,
    };

    let request = engine
        .get_request(&event_id, &session_id, &relay_url)
        .await
        .with_context(|| format!("Failed to fetch event {}", event_id))?;
    print_request(&request);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use serde_json::json;
    use walletlink_client::SessionCipher;
    use walletlink_core::SessionSecret;
    use walletlink_types::{EventFrame, EventName, EventPayload, Web3Request, Web3RequestBody};

    #[tokio::test]
    async fn fetches_stored_request() {
        let (engine, connector) = testing::linked_engine("S1").await;
        let cipher = SessionCipher::derive(&SessionSecret::new(testing::SECRET).unwrap()).unwrap();
        let payload = EventPayload::Request(Web3Request {
            id: "req-9".into(),
            origin: Some("https://dapp.example".into()),
            request: Web3RequestBody {
                method: "requestEthereumAccounts".into(),
                params: json!([]),
            },
        });
        connector.mock(testing::RELAY).store_event(EventFrame {
            session_id: SessionId::new("S1").unwrap(),
            event_id: EventId::new("E9").unwrap(),
            event: EventName::Web3Request,
            ciphertext: cipher.encrypt(&payload.to_json().unwrap()).unwrap(),
        });

        run(&engine, "S1", "E9", None).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_session_or_event_fails() {
        let (engine, _) = testing::linked_engine("S1").await;
        assert!(run(&engine, "S404", "E1", None).await.is_err());
        assert!(run(&engine, "S1", "E404", None).await.is_err());
    }
}
