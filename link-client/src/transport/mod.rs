//! Transport abstraction for WalletLink.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying relay connection (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one encoded client frame
//! - `recv()` waits for the next relay frame
//! - `close()` gracefully terminates
//!
//! `send()` and `recv()` may be called concurrently from different tasks.
//! A [`Connector`] hands out one transport per relay URL.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::relay();
//! transport.connect("wss://relay.example.org").await?;
//! transport.send(&frame.to_bytes()?).await?;
//! let reply = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::{MockConnector, MockTransport};
pub use websocket::{relay_endpoint, WebSocketConnector, WebSocketTransport, RELAY_PATH};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Maximum size of one relay frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Transport errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The relay did not answer in time.
    #[error("relay did not answer in time")]
    Timeout,

    /// The relay answered with an error.
    #[error("relay rejected request: {0}")]
    Rejected(String),
}

/// Transport trait for exchanging relay frames.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at the given URL.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one encoded frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next encoded frame.
    ///
    /// Waits until data is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory for relay transports.
pub trait Connector: Send + Sync + 'static {
    /// Create a transport for the relay at `relay_url`. The transport is
    /// not connected yet.
    fn transport(&self, relay_url: &str) -> Arc<dyn Transport>;
}
