//! WebSocket transport to a WalletLink relay.
//!
//! Frames travel as binary WebSocket messages. Relay URLs from QR codes are
//! usually `https://`; they are mapped onto the relay's WebSocket endpoint.

use super::{Connector, Transport, TransportError, MAX_FRAME_SIZE};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;
use walletlink_types::PROTOCOL_VERSION;

/// Path of the relay's WebSocket endpoint.
pub const RELAY_PATH: &str = "rpc";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Map a relay URL onto its WebSocket endpoint.
///
/// `http` becomes `ws`, `https` becomes `wss`, and the `rpc` path segment is
/// appended unless already present. The protocol version travels as a query
/// parameter.
pub fn relay_endpoint(relay_url: &str) -> Result<Url, TransportError> {
    let mut url =
        Url::parse(relay_url).map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::ConnectionFailed("cannot set scheme".into()))?;

    let has_rpc = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| last == RELAY_PATH)
        .unwrap_or(false);
    if !has_rpc {
        url.path_segments_mut()
            .map_err(|_| TransportError::ConnectionFailed("url cannot be a base".into()))?
            .pop_if_empty()
            .push(RELAY_PATH);
    }
    url.query_pairs_mut()
        .append_pair("v", &PROTOCOL_VERSION.to_string());
    Ok(url)
}

/// WebSocket connection to one relay.
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let endpoint = relay_endpoint(address)?;
        debug!("Connecting to relay endpoint {}", endpoint);

        let (ws, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(endpoint.as_str()))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(TransportError::SendFailed(format!(
                "frame of {} bytes exceeds limit",
                data.len()
            )));
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > MAX_FRAME_SIZE {
                        debug!("Dropping oversized relay frame ({} bytes)", data.len());
                        continue;
                    }
                    return Ok(data);
                }
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Relay closed connection: {:?}", frame);
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                // Ping/pong handled by tungstenite
                Some(Ok(other)) => trace!("Ignoring control message {:?}", other),
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            // Best effort: the peer may already be gone.
            let _ = sink.close().await;
        }
        Ok(())
    }
}

/// Connector producing WebSocket transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn transport(&self, _relay_url: &str) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::new())
    }
}
