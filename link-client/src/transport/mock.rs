//! Mock transport for testing.
//!
//! Allows queueing responses and capturing sent messages for verification.
//! A transport created with [`MockTransport::relay`] additionally behaves
//! like a minimal relay: it answers every client frame, remembers
//! subscriptions, and serves stored events to `GetEvent`.

use super::{Connector, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use walletlink_types::{ClientFrame, EventFrame, EventId, RelayFrame, SessionId};

/// Mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    incoming: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_attempts: u32,
    sent_messages: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    fail_connects: u32,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    // Relay simulation
    auto_reply: bool,
    hold_replies: bool,
    subscriptions: BTreeSet<SessionId>,
    rejected_sessions: HashSet<SessionId>,
    fail_publishes: u32,
    stored_events: HashMap<EventId, EventFrame>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock transport that answers frames like a relay.
    pub fn relay() -> Self {
        let transport = Self::default();
        transport.lock().auto_reply = true;
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        // A panicking test thread must not cascade into unrelated tests.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a message to be returned by a `recv()` call.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.lock().receive_queue.push_back(data);
        self.incoming.notify_one();
    }

    /// Deliver a host event, and keep it for later `GetEvent` lookups.
    pub fn push_event(&self, frame: EventFrame) {
        self.store_event(frame.clone());
        if let Ok(bytes) = RelayFrame::Event(frame).to_bytes() {
            self.queue_response(bytes);
        }
    }

    /// Keep an event for `GetEvent` without delivering it.
    pub fn store_event(&self, frame: EventFrame) {
        self.lock()
            .stored_events
            .insert(frame.event_id.clone(), frame);
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.lock().sent_messages.clone()
    }

    /// All sent messages decoded as client frames.
    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        self.sent_messages()
            .iter()
            .filter_map(|bytes| ClientFrame::from_bytes(bytes).ok())
            .collect()
    }

    /// Sent `Publish` frames' payloads.
    pub fn published(&self) -> Vec<EventFrame> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Publish { frame, .. } => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent_messages.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Sessions the simulated relay currently has subscribed.
    pub fn subscriptions(&self) -> BTreeSet<SessionId> {
        self.lock().subscriptions.clone()
    }

    /// Cause the next `count` connect() calls to fail.
    pub fn fail_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
        self.incoming.notify_one();
    }

    /// Simulated relay answers `Fail` to subscriptions for this session.
    pub fn reject_session(&self, session_id: &SessionId) {
        self.lock().rejected_sessions.insert(session_id.clone());
    }

    /// Simulated relay answers `Fail` to the next `count` publishes.
    pub fn fail_publishes(&self, count: u32) {
        self.lock().fail_publishes = count;
    }

    /// Simulated relay stops answering frames (sent frames are still recorded).
    pub fn hold_replies(&self, hold: bool) {
        self.lock().hold_replies = hold;
    }

    /// Drop the connection as if the network went away.
    pub fn drop_connection(&self) {
        {
            let mut inner = self.lock();
            inner.connected = false;
            inner.subscriptions.clear();
        }
        self.incoming.notify_one();
    }

    /// Clear all state (messages, queue, connection).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }

    fn reply_to(inner: &mut MockTransportInner, data: &[u8]) -> Option<RelayFrame> {
        let frame = ClientFrame::from_bytes(data).ok()?;
        let reply = match frame {
            ClientFrame::Subscribe { id, session_id, .. } => {
                if inner.rejected_sessions.contains(&session_id) {
                    RelayFrame::Fail {
                        id,
                        error: "invalid session key".into(),
                    }
                } else {
                    inner.subscriptions.insert(session_id);
                    RelayFrame::Ack { id }
                }
            }
            ClientFrame::Unsubscribe { id, session_id } => {
                inner.subscriptions.remove(&session_id);
                RelayFrame::Ack { id }
            }
            ClientFrame::Publish { id, .. } if inner.fail_publishes > 0 => {
                inner.fail_publishes -= 1;
                RelayFrame::Fail {
                    id,
                    error: "publish rejected".into(),
                }
            }
            ClientFrame::Publish { id, .. } | ClientFrame::SetSessionConfig { id, .. } => {
                RelayFrame::Ack { id }
            }
            ClientFrame::GetEvent { id, event_id, .. } => RelayFrame::EventResponse {
                id,
                event: inner.stored_events.get(&event_id).cloned(),
            },
        };
        Some(reply)
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            incoming: Arc::clone(&self.incoming),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connect_attempts += 1;

        // Check for forced failure
        if inner.fail_connects > 0 {
            inner.fail_connects -= 1;
            return Err(TransportError::ConnectionFailed("mock refused".into()));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        inner.receive_queue.clear();
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let replied = {
            let mut inner = self.lock();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_messages.push(data.to_vec());

            if inner.auto_reply && !inner.hold_replies {
                match Self::reply_to(&mut inner, data).map(|reply| reply.to_bytes()) {
                    Some(Ok(bytes)) => {
                        inner.receive_queue.push_back(bytes);
                        true
                    }
                    _ => false,
                }
            } else {
                false
            }
        };
        if replied {
            self.incoming.notify_one();
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        loop {
            {
                let mut inner = self.lock();

                if !inner.connected {
                    return Err(TransportError::ConnectionClosed);
                }

                // Check for forced failure
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }

                if let Some(data) = inner.receive_queue.pop_front() {
                    return Ok(data);
                }
            }
            self.incoming.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut inner = self.lock();
            inner.connected = false;
            inner.subscriptions.clear();
        }
        self.incoming.notify_one();
        Ok(())
    }
}

/// Connector handing out one shared [`MockTransport`] per relay URL.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    transports: Arc<Mutex<HashMap<String, MockTransport>>>,
}

impl MockConnector {
    /// Create a connector whose transports simulate a relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// The transport used for `relay_url`, created on first use.
    pub fn mock(&self, relay_url: &str) -> MockTransport {
        let mut transports = self.transports.lock().unwrap_or_else(|e| e.into_inner());
        transports
            .entry(relay_url.to_string())
            .or_insert_with(MockTransport::relay)
            .clone()
    }

    /// Relay URLs a transport was requested for.
    pub fn relay_urls(&self) -> Vec<String> {
        let transports = self.transports.lock().unwrap_or_else(|e| e.into_inner());
        let mut urls: Vec<String> = transports.keys().cloned().collect();
        urls.sort();
        urls
    }
}

impl Connector for MockConnector {
    fn transport(&self, relay_url: &str) -> Arc<dyn Transport> {
        Arc::new(self.mock(relay_url))
    }
}
