//! Print (and optionally reject) incoming host requests.

use anyhow::Result;
use std::collections::BTreeMap;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use walletlink_client::{LinkEvent, WalletLink};
use walletlink_types::ClientMetadataKey;

use super::print_request;

/// Options for the listen command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenOptions {
    /// Reject every request as it arrives.
    pub auto_reject: bool,
    /// Stop after this many requests.
    pub count: Option<usize>,
}

/// Run the listen command until Ctrl-C (or `count` requests).
pub async fn run(
    engine: &WalletLink,
    metadata: BTreeMap<ClientMetadataKey, String>,
    options: ListenOptions,
) -> Result<()> {
    let mut requests = engine.requests();
    let mut events = engine.events();
    engine.connect(metadata).await?;

    println!("Listening for host requests (Ctrl-C to stop)...");
    println!();

    let mut handled = 0;
    loop {
        tokio::select! {
            request = requests.next() => {
                let Some(request) = request else { break };
                print_request(&request);
                if options.auto_reject {
                    match engine.reject(&request.id).await {
                        Ok(()) => println!("  -> rejected"),
                        Err(e) => warn!("Rejecting {} failed: {}", request.id, e),
                    }
                }
                println!();
                handled += 1;
                if options.count.is_some_and(|count| handled >= count) {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(LinkEvent::RequestCanceled(id)) => println!("Host canceled {}", id),
                Ok(LinkEvent::ConnectivityExhausted { relay_url, attempts, error }) => {
                    println!("Relay {} unreachable after {} attempts: {}", relay_url, attempts, error);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.disconnect();
    println!("Handled {} request(s).", handled);
    Ok(())
}
