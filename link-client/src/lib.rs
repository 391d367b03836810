//! # link-client
//!
//! Wallet-side engine for the WalletLink protocol.
//!
//! This is the main library that wallets use to talk to dApp hosts.
//!
//! ## Features
//!
//! - **E2E Encryption**: XChaCha20-Poly1305 keyed per session via HKDF
//! - **Relay Multiplexing**: one connection per relay, shared by its sessions
//! - **Automatic Recovery**: backoff reconnect, resubscribe, metadata re-sync
//! - **Exactly-once Answers**: duplicate deliveries replay the cached response
//! - **Pure State Machine**: connection logic lives in link-core
//!
//! ## Example
//!
//! ```ignore
//! use walletlink_client::{LinkConfig, WalletLink};
//!
//! let engine = WalletLink::open(LinkConfig::default()).await?;
//! engine.connect(Default::default()).await?;
//! engine.link_payload(&scanned_qr, Default::default()).await?;
//!
//! let mut requests = engine.requests();
//! while let Some(request) = requests.next().await {
//!     engine.reject(&request.id).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod outstanding;
pub mod relay;
pub mod store;
pub mod transport;

pub use config::{ConfigError, LinkConfig};
pub use crypto::{CryptoError, SessionCipher, KEY_SIZE, NONCE_SIZE};
pub use engine::{LinkEvent, RequestStream, WalletLink};
pub use error::LinkError;
pub use outstanding::{DeliveryState, OutstandingRequests};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore, StoreError};
pub use transport::{
    Connector, MockConnector, MockTransport, Transport, TransportError, WebSocketConnector,
};
