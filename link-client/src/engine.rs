//! The wallet-side WalletLink engine.
//!
//! [`WalletLink`] ties the pieces together:
//!
//! ```text
//!  relay links ──RelayEvent──► dispatcher ──decrypt/parse──► outstanding table
//!                                  │                              │
//!                                  └──────── LinkEvent ◄──────────┘
//!                                               │
//!                               requests() / events() subscribers
//! ```
//!
//! Inbound events are processed by a single dispatcher task, which keeps
//! the relay's per-session order. Caller operations (link, respond,
//! metadata) run on the caller's task and report failures synchronously.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walletlink_core::{
    normalize_relay_url, ConnectionState, HostMessage, HostRequest, HostRequestId, LinkPayload,
    Session, SessionSecret,
};
use walletlink_types::{ClientMetadataKey, EventFrame, EventId, EventName, EventPayload, SessionId};

use crate::config::LinkConfig;
use crate::crypto::SessionCipher;
use crate::metadata::MetadataSync;
use crate::outstanding::{Observation, OutstandingRequests, ResponseRejected};
use crate::relay::{RelayEvent, RelayPool};
use crate::store::{SessionStore, SqliteSessionStore};
use crate::transport::{Connector, TransportError, WebSocketConnector};
use crate::LinkError;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Extra ids a request stream remembers before pruning answered ones.
const PRUNE_SLACK: usize = 64;

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A new host request awaits an answer.
    Request(HostRequest),
    /// The host withdrew a pending request.
    RequestCanceled(HostRequestId),
    /// A relay link changed state.
    StateChanged {
        /// Relay whose state changed.
        relay_url: String,
        /// New state.
        state: ConnectionState,
    },
    /// A relay link gave up reconnecting; call [`WalletLink::connect`] to retry.
    ConnectivityExhausted {
        /// Unreachable relay.
        relay_url: String,
        /// Failed attempts.
        attempts: u32,
        /// Last error.
        error: String,
    },
    /// A session was unlinked.
    SessionUnlinked(SessionId),
}

#[derive(Clone)]
struct Linked {
    session: Session,
    cipher: SessionCipher,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    pool: RelayPool,
    sessions: DashMap<SessionId, Linked>,
    outstanding: OutstandingRequests,
    metadata: MetadataSync,
    events: broadcast::Sender<LinkEvent>,
    started: AtomicBool,
}

/// Wallet-side engine linking this wallet to dApp hosts through relays.
pub struct WalletLink {
    inner: Arc<Inner>,
    dispatcher: JoinHandle<()>,
}

impl WalletLink {
    /// Create an engine over `store`, loading previously linked sessions.
    ///
    /// The engine stays offline until [`WalletLink::connect`].
    pub async fn new(
        config: LinkConfig,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, LinkError> {
        config.validate()?;

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.requests.stream_buffer);
        let inner = Arc::new(Inner {
            store,
            pool: RelayPool::new(
                connector,
                config.reconnect_policy(),
                config.ack_timeout(),
                relay_tx,
            ),
            sessions: DashMap::new(),
            outstanding: OutstandingRequests::new(config.retention(), config.requests.capacity),
            metadata: MetadataSync::new(config.user_id.clone(), config.notification_url.clone()),
            events,
            started: AtomicBool::new(false),
        });

        for session in inner.store.list().await? {
            let cipher = SessionCipher::derive(&session.secret)?;
            inner
                .pool
                .attach(&session.relay_url, &session.id, &session.session_key());
            inner.sessions.insert(session.id.clone(), Linked { session, cipher });
        }
        info!("Loaded {} linked sessions", inner.sessions.len());

        let dispatcher = tokio::spawn(run_dispatcher(Arc::clone(&inner), relay_rx));
        Ok(Self { inner, dispatcher })
    }

    /// Engine backed by the SQLite database named in `config`, talking
    /// WebSocket to relays.
    pub async fn open(config: LinkConfig) -> Result<Self, LinkError> {
        let store = SqliteSessionStore::new(&config.storage.database).await?;
        Self::new(config, Arc::new(store), Arc::new(WebSocketConnector)).await
    }

    /// Connect to every relay with linked sessions, first applying
    /// `metadata` to all sessions.
    ///
    /// Returns once the connections are initiated; progress is reported
    /// through [`WalletLink::events`].
    pub async fn connect(
        &self,
        metadata: BTreeMap<ClientMetadataKey, String>,
    ) -> Result<(), LinkError> {
        for (key, value) in &metadata {
            for id in self.inner.session_ids() {
                self.inner.persist_metadata(&id, key, value).await?;
            }
        }
        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.pool.connect_all();
        Ok(())
    }

    /// Wait until every relay link is connected, for at most `timeout`
    /// per link.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), LinkError> {
        for link in self.inner.pool.all() {
            link.wait_connected(timeout).await?;
        }
        Ok(())
    }

    /// Close every relay connection. Sessions stay linked.
    pub fn disconnect(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
        self.inner.pool.disconnect_all();
    }

    /// Link a new session.
    ///
    /// Succeeds only once the relay confirms the subscription; on any
    /// failure the session is not left behind in the store or on the relay.
    /// The engine must be connected.
    pub async fn link(
        &self,
        session_id: SessionId,
        name: &str,
        secret: &str,
        relay_url: &str,
        metadata: BTreeMap<ClientMetadataKey, String>,
    ) -> Result<Session, LinkError> {
        let secret = SessionSecret::new(secret)?;
        let session = Session::new(session_id, secret, name, relay_url)?.with_metadata(metadata);
        self.link_session(session).await
    }

    /// Link a session from a scanned pairing payload.
    pub async fn link_payload(
        &self,
        payload: &str,
        metadata: BTreeMap<ClientMetadataKey, String>,
    ) -> Result<Session, LinkError> {
        let session = LinkPayload::from_qr_payload(payload)?
            .into_session()
            .with_metadata(metadata);
        self.link_session(session).await
    }

    async fn link_session(&self, session: Session) -> Result<Session, LinkError> {
        let inner = &self.inner;
        if !inner.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected.into());
        }
        if inner.sessions.contains_key(&session.id) {
            return Err(LinkError::DuplicateSession(session.id));
        }
        let cipher = SessionCipher::derive(&session.secret)?;

        inner.store.create(&session).await?;
        inner.sessions.insert(
            session.id.clone(),
            Linked {
                session: session.clone(),
                cipher: cipher.clone(),
            },
        );

        match inner.attach(&session, &cipher).await {
            Ok(()) => {
                info!(
                    "Linked session {} ({}) via {}",
                    session.id, session.name, session.relay_url
                );
                Ok(session)
            }
            Err(e) => {
                warn!("Linking session {} failed: {}", session.id, e);
                inner.sessions.remove(&session.id);
                inner.pool.detach(&session.relay_url, &session.id).await;
                if let Err(rollback) = inner.store.remove(&session.id).await {
                    error!("Rolling back session {} failed: {}", session.id, rollback);
                }
                Err(e)
            }
        }
    }

    /// Unlink a session: unsubscribe from its relay and forget it.
    pub async fn unlink(&self, session_id: &SessionId) -> Result<(), LinkError> {
        let inner = &self.inner;
        let relay_url = inner
            .sessions
            .get(session_id)
            .map(|linked| linked.session.relay_url.clone())
            .ok_or_else(|| LinkError::SessionNotFound(session_id.clone()))?;

        inner.store.remove(session_id).await?;
        inner.sessions.remove(session_id);
        inner.pool.detach(&relay_url, session_id).await;
        inner.outstanding.remove_session(session_id);
        info!("Unlinked session {}", session_id);
        let _ = inner.events.send(LinkEvent::SessionUnlinked(session_id.clone()));
        Ok(())
    }

    /// All linked sessions, in the order they were linked.
    pub async fn sessions(&self) -> Result<Vec<Session>, LinkError> {
        Ok(self.inner.store.list().await?)
    }

    /// One linked session.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.inner
            .sessions
            .get(session_id)
            .map(|linked| linked.session.clone())
    }

    /// Set a metadata value on every linked session.
    ///
    /// Sessions unlinked while the broadcast runs are skipped.
    pub async fn set_metadata(&self, key: ClientMetadataKey, value: &str) -> Result<(), LinkError> {
        for id in self.inner.session_ids() {
            match self.inner.update_metadata(&id, &key, value).await {
                Err(LinkError::SessionNotFound(gone)) => {
                    debug!("Skipping metadata for unlinked session {}", gone);
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Set a metadata value on one session.
    pub async fn set_session_metadata(
        &self,
        session_id: &SessionId,
        key: ClientMetadataKey,
        value: &str,
    ) -> Result<(), LinkError> {
        if !self.inner.sessions.contains_key(session_id) {
            return Err(LinkError::SessionNotFound(session_id.clone()));
        }
        self.inner.update_metadata(session_id, &key, value).await
    }

    /// Grant a dApp access to one account.
    pub async fn approve_dapp_permission(
        &self,
        id: &HostRequestId,
        address: &str,
    ) -> Result<(), LinkError> {
        self.respond(id, |request| request.approve_dapp_permission(address))
            .await
    }

    /// Answer a request successfully with `result`.
    pub async fn approve(&self, id: &HostRequestId, result: Value) -> Result<(), LinkError> {
        self.respond(id, |request| request.approve(result)).await
    }

    /// Reject a request.
    pub async fn reject(&self, id: &HostRequestId) -> Result<(), LinkError> {
        self.respond(id, HostRequest::reject).await
    }

    async fn respond(
        &self,
        id: &HostRequestId,
        build: impl FnOnce(&HostRequest) -> EventPayload,
    ) -> Result<(), LinkError> {
        let outstanding = &self.inner.outstanding;
        let request = outstanding.begin_response(id).map_err(|e| match e {
            ResponseRejected::NotFound => LinkError::SessionNotFound(id.session_id.clone()),
            ResponseRejected::Duplicate => LinkError::DuplicateResponse(id.clone()),
        })?;

        match self.inner.publish_response(&request, build(&request)).await {
            Ok(frame) => {
                outstanding.complete_response(id, frame, Instant::now());
                info!("Answered {} request {}", request.method, id);
                Ok(())
            }
            Err(e) => {
                outstanding.abort_response(id);
                warn!("Answering request {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    /// Fetch one request from the relay by event id, for example after a
    /// push notification woke the wallet.
    ///
    /// The request is surfaced on the request stream only if it was not
    /// already delivered; an already answered request gets its cached
    /// response retransmitted.
    pub async fn get_request(
        &self,
        event_id: &EventId,
        session_id: &SessionId,
        relay_url: &str,
    ) -> Result<HostRequest, LinkError> {
        let inner = &self.inner;
        let linked = inner
            .linked(session_id)
            .ok_or_else(|| LinkError::SessionNotFound(session_id.clone()))?;
        let relay_url = normalize_relay_url(relay_url)?;

        let frame = inner
            .pool
            .fetch_event(
                &relay_url,
                session_id,
                &linked.session.session_key(),
                event_id,
            )
            .await?
            .filter(|frame| frame.session_id == *session_id && frame.event == EventName::Web3Request)
            .ok_or_else(|| LinkError::EventNotFound(event_id.clone()))?;

        let plaintext = linked.cipher.decrypt(&frame.ciphertext)?;
        match HostMessage::parse(session_id, event_id, &plaintext)? {
            HostMessage::Request(request) => {
                inner.surface(&linked.session.relay_url, request.clone());
                Ok(request)
            }
            HostMessage::Canceled { .. } => Err(LinkError::EventNotFound(event_id.clone())),
        }
    }

    /// Host requests from every session: first those still awaiting an
    /// answer, then new ones as they arrive.
    pub fn requests(&self) -> RequestStream {
        RequestStream::new(&self.inner, None)
    }

    /// Host requests from one session. The stream ends when the session
    /// is unlinked.
    pub fn requests_for(&self, session_id: &SessionId) -> Result<RequestStream, LinkError> {
        if !self.inner.sessions.contains_key(session_id) {
            return Err(LinkError::SessionNotFound(session_id.clone()));
        }
        Ok(RequestStream::new(&self.inner, Some(session_id.clone())))
    }

    /// Every engine event from now on.
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Push notification URL registered with relays.
    pub fn notification_url(&self) -> Option<&str> {
        self.inner.metadata.webhook_url()
    }

    /// Connection state of the link to `relay_url`, if one exists.
    pub fn connection_state(&self, relay_url: &str) -> Option<ConnectionState> {
        let relay_url = normalize_relay_url(relay_url).ok()?;
        self.inner.pool.get(&relay_url).map(|link| link.state())
    }
}

impl Drop for WalletLink {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for WalletLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLink")
            .field("sessions", &self.inner.sessions.len())
            .field("outstanding", &self.inner.outstanding.len())
            .finish()
    }
}

impl Inner {
    fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Requests awaiting an answer, for one session or all of them.
    fn pending_requests(&self, session_id: Option<&SessionId>) -> Vec<HostRequest> {
        match session_id {
            Some(id) => self.outstanding.pending(id),
            None => self
                .session_ids()
                .iter()
                .flat_map(|id| self.outstanding.pending(id))
                .collect(),
        }
    }

    fn linked(&self, session_id: &SessionId) -> Option<Linked> {
        self.sessions.get(session_id).map(|linked| linked.clone())
    }

    async fn attach(&self, session: &Session, cipher: &SessionCipher) -> Result<(), LinkError> {
        let session_key = session.session_key();
        let link = self.pool.attach(&session.relay_url, &session.id, &session_key);
        link.connect();
        link.subscribe(&session.id, &session_key).await?;
        self.metadata.push(&link, session, cipher).await
    }

    /// Store a metadata value and mirror it in the session cache.
    async fn persist_metadata(
        &self,
        session_id: &SessionId,
        key: &ClientMetadataKey,
        value: &str,
    ) -> Result<Option<Linked>, LinkError> {
        self.store.update_metadata(session_id, key, value).await?;
        Ok(self.sessions.get_mut(session_id).map(|mut linked| {
            linked
                .session
                .metadata
                .insert(key.clone(), value.to_string());
            linked.clone()
        }))
    }

    async fn update_metadata(
        &self,
        session_id: &SessionId,
        key: &ClientMetadataKey,
        value: &str,
    ) -> Result<(), LinkError> {
        let Some(linked) = self.persist_metadata(session_id, key, value).await? else {
            return Ok(());
        };
        let link = self.pool.get(&linked.session.relay_url);
        if let Err(e) = self
            .metadata
            .push_if_connected(link.as_deref(), &linked.session, &linked.cipher)
            .await
        {
            warn!(
                "Metadata for session {} not delivered, will retry on reconnect: {}",
                session_id, e
            );
        }
        Ok(())
    }

    async fn publish_response(
        &self,
        request: &HostRequest,
        payload: EventPayload,
    ) -> Result<EventFrame, LinkError> {
        let linked = self
            .linked(&request.id.session_id)
            .ok_or_else(|| LinkError::SessionNotFound(request.id.session_id.clone()))?;
        let ciphertext = linked.cipher.encrypt(&payload.to_json()?)?;
        let frame = EventFrame {
            session_id: request.id.session_id.clone(),
            event_id: request.id.event_id.clone(),
            event: EventName::Web3Response,
            ciphertext,
        };
        let link = self
            .pool
            .get(&linked.session.relay_url)
            .ok_or(TransportError::NotConnected)?;
        link.publish(frame.clone()).await?;
        Ok(frame)
    }

    /// Hand a parsed request to the outstanding table and act on what it
    /// has seen before.
    fn surface(self: &Arc<Self>, relay_url: &str, request: HostRequest) {
        match self.outstanding.observe(&request, Instant::now()) {
            Observation::New => {
                info!("New {} request {}", request.method, request.id);
                let _ = self.events.send(LinkEvent::Request(request));
            }
            Observation::Pending => debug!("Request {} is already pending", request.id),
            Observation::Responded(cached) => {
                debug!("Replaying cached response to {}", request.id);
                let inner = Arc::clone(self);
                let relay_url = relay_url.to_string();
                tokio::spawn(async move {
                    let Some(link) = inner.pool.get(&relay_url) else {
                        return;
                    };
                    if let Err(e) = link.publish(cached).await {
                        warn!("Replaying response to {} failed: {}", request.id, e);
                    }
                });
            }
        }
    }

    fn handle(self: &Arc<Self>, event: RelayEvent) {
        match event {
            RelayEvent::Frame { relay_url, frame } => self.handle_frame(&relay_url, frame),
            RelayEvent::FlushMetadata { relay_url } => self.flush_metadata(relay_url),
            RelayEvent::StateChanged { relay_url, state } => {
                let _ = self
                    .events
                    .send(LinkEvent::StateChanged { relay_url, state });
            }
            RelayEvent::Exhausted {
                relay_url,
                attempts,
                error,
            } => {
                let _ = self.events.send(LinkEvent::ConnectivityExhausted {
                    relay_url,
                    attempts,
                    error,
                });
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, relay_url: &str, frame: EventFrame) {
        let Some(linked) = self.linked(&frame.session_id) else {
            debug!("Dropping event for unknown session {}", frame.session_id);
            return;
        };
        if !matches!(
            frame.event,
            EventName::Web3Request | EventName::Web3RequestCanceled
        ) {
            debug!("Ignoring {:?} event {}", frame.event, frame.event_id);
            return;
        }
        let plaintext = match linked.cipher.decrypt(&frame.ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(
                    "Dropping event {} for session {}: {}",
                    frame.event_id, frame.session_id, e
                );
                return;
            }
        };
        match HostMessage::parse(&frame.session_id, &frame.event_id, &plaintext) {
            Ok(HostMessage::Request(request)) => self.surface(relay_url, request),
            Ok(HostMessage::Canceled {
                session_id,
                request_id,
            }) => match self.outstanding.cancel(&session_id, &request_id) {
                Some(request) => {
                    info!("Host canceled request {}", request.id);
                    let _ = self.events.send(LinkEvent::RequestCanceled(request.id));
                }
                None => debug!("Nothing to cancel for {}/{}", session_id, request_id),
            },
            Err(e) => warn!(
                "Dropping unparseable event {} for session {}: {}",
                frame.event_id, frame.session_id, e
            ),
        }
    }

    fn flush_metadata(self: &Arc<Self>, relay_url: String) {
        let sessions: Vec<Linked> = self
            .sessions
            .iter()
            .filter(|linked| linked.session.relay_url == relay_url)
            .map(|linked| linked.clone())
            .collect();
        if sessions.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let link = inner.pool.get(&relay_url);
            for linked in sessions {
                if let Err(e) = inner
                    .metadata
                    .push_if_connected(link.as_deref(), &linked.session, &linked.cipher)
                    .await
                {
                    warn!("Flushing metadata for session {} failed: {}", linked.session.id, e);
                }
            }
        });
    }
}

async fn run_dispatcher(inner: Arc<Inner>, mut relay_events: mpsc::UnboundedReceiver<RelayEvent>) {
    let mut purge = tokio::time::interval(PURGE_INTERVAL);
    purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            event = relay_events.recv() => match event {
                Some(event) => inner.handle(event),
                None => break,
            },
            _ = purge.tick() => {
                let purged = inner.outstanding.purge(Instant::now());
                if purged > 0 {
                    debug!("Purged {} expired requests", purged);
                }
            }
        }
    }
}

/// Host requests in arrival order.
///
/// Each call to [`WalletLink::requests`] starts an independent stream.
/// A subscriber that falls more than `stream_buffer` events behind
/// catches up from the outstanding table, so pending requests are not
/// lost to a slow reader.
pub struct RequestStream {
    inner: Weak<Inner>,
    receiver: broadcast::Receiver<LinkEvent>,
    session: Option<SessionId>,
    backlog: VecDeque<HostRequest>,
    delivered: HashSet<HostRequestId>,
}

impl RequestStream {
    fn new(inner: &Arc<Inner>, session: Option<SessionId>) -> Self {
        let receiver = inner.events.subscribe();
        let mut stream = Self {
            inner: Arc::downgrade(inner),
            receiver,
            session,
            backlog: VecDeque::new(),
            delivered: HashSet::new(),
        };
        stream.catch_up();
        stream
    }

    /// Queue pending requests this stream has not handed out yet.
    fn catch_up(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        self.prune(&inner);
        for request in inner.pending_requests(self.session.as_ref()) {
            if self.delivered.insert(request.id.clone()) {
                self.backlog.push_back(request);
            }
        }
    }

    /// Forget handed-out requests the table no longer tracks.
    fn prune(&mut self, inner: &Inner) {
        self.delivered
            .retain(|id| inner.outstanding.state(id).is_some());
    }

    /// Next request, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<HostRequest> {
        loop {
            if let Some(request) = self.backlog.pop_front() {
                return Some(request);
            }
            match self.receiver.recv().await {
                Ok(LinkEvent::Request(request)) => {
                    if self
                        .session
                        .as_ref()
                        .is_some_and(|session| *session != request.id.session_id)
                    {
                        continue;
                    }
                    if !self.delivered.insert(request.id.clone()) {
                        continue;
                    }
                    if let Some(inner) = self.inner.upgrade() {
                        if self.delivered.len() > inner.outstanding.len() + PRUNE_SLACK {
                            self.prune(&inner);
                        }
                    }
                    return Some(request);
                }
                Ok(LinkEvent::SessionUnlinked(id)) if self.session.as_ref() == Some(&id) => {
                    return None
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Request stream lagged by {} events, catching up from pending requests",
                        skipped
                    );
                    self.catch_up();
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for RequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStream")
            .field("session", &self.session)
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use crate::transport::{MockConnector, MockTransport, Transport};
    use serde_json::json;
    use walletlink_core::REJECTED_MESSAGE;
    use walletlink_types::{Web3Request, Web3RequestBody, Web3RequestCanceled};

    const RELAY: &str = "https://relay.example.org";
    const OTHER_RELAY: &str = "https://relay2.example.org";
    const SECRET: &str = "abc123";

    struct Harness {
        engine: WalletLink,
        connector: MockConnector,
        store: Arc<MemorySessionStore>,
    }

    fn test_config() -> LinkConfig {
        let mut config = LinkConfig::new("user-1", "https://push.example.org/notify");
        config.ack_timeout_ms = 500;
        config.reconnect.base_delay_ms = 5;
        config.reconnect.max_delay_ms = 20;
        config.reconnect.max_jitter_ms = 0;
        config.reconnect.max_attempts = 3;
        config
    }

    async fn harness_with(config: LinkConfig) -> Harness {
        let connector = MockConnector::new();
        let store = Arc::new(MemorySessionStore::new());
        let engine = WalletLink::new(config, store.clone(), Arc::new(connector.clone()))
            .await
            .unwrap();
        engine.connect(BTreeMap::new()).await.unwrap();
        Harness {
            engine,
            connector,
            store,
        }
    }

    async fn harness() -> Harness {
        harness_with(test_config()).await
    }

    fn sid(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    fn eid(id: &str) -> EventId {
        EventId::new(id).unwrap()
    }

    fn cipher() -> SessionCipher {
        SessionCipher::derive(&SessionSecret::new(SECRET).unwrap()).unwrap()
    }

    fn request_frame(session: &str, event: &str, request_id: &str, method: &str) -> EventFrame {
        let payload = EventPayload::Request(Web3Request {
            id: request_id.into(),
            origin: Some("https://dapp.example".into()),
            request: Web3RequestBody {
                method: method.into(),
                params: json!({}),
            },
        });
        EventFrame {
            session_id: sid(session),
            event_id: eid(event),
            event: EventName::Web3Request,
            ciphertext: cipher().encrypt(&payload.to_json().unwrap()).unwrap(),
        }
    }

    fn cancel_frame(session: &str, event: &str, request_id: &str) -> EventFrame {
        let payload = EventPayload::Canceled(Web3RequestCanceled {
            id: request_id.into(),
            origin: None,
        });
        EventFrame {
            session_id: sid(session),
            event_id: eid(event),
            event: EventName::Web3RequestCanceled,
            ciphertext: cipher().encrypt(&payload.to_json().unwrap()).unwrap(),
        }
    }

    async fn link(h: &Harness, session: &str, relay: &str) -> Session {
        h.engine
            .link(sid(session), "dapp", SECRET, relay, BTreeMap::new())
            .await
            .unwrap()
    }

    async fn next_request(stream: &mut RequestStream) -> HostRequest {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no request arrived")
            .expect("stream ended")
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    fn decrypt_response(frame: &EventFrame) -> walletlink_types::Web3Response {
        let plaintext = cipher().decrypt(&frame.ciphertext).unwrap();
        match EventPayload::from_json(&plaintext).unwrap() {
            EventPayload::Response(response) => response,
            other => panic!("expected a response, got {:?}", other),
        }
    }

    fn responses(mock: &MockTransport) -> Vec<EventFrame> {
        mock.published()
            .into_iter()
            .filter(|frame| frame.event == EventName::Web3Response)
            .collect()
    }

    // ===========================================
    // Linking Tests
    // ===========================================

    #[tokio::test]
    async fn link_subscribes_and_persists() {
        let h = harness().await;
        let session = link(&h, "S1", RELAY).await;

        assert_eq!(session.id, sid("S1"));
        assert!(h.connector.mock(RELAY).subscriptions().contains(&sid("S1")));
        assert_eq!(h.store.get(&sid("S1")).await.unwrap(), Some(session));
        assert_eq!(h.engine.sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn link_payload_links_scanned_session() {
        let h = harness().await;
        let payload = LinkPayload {
            session_id: sid("S7"),
            name: "Uniswap".into(),
            secret: SessionSecret::new(SECRET).unwrap(),
            relay_url: RELAY.into(),
        }
        .to_qr_payload();

        let session = h
            .engine
            .link_payload(&payload, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(session.name, "Uniswap");
        assert!(h.engine.session(&sid("S7")).is_some());
    }

    #[tokio::test]
    async fn invalid_secret_is_rejected_before_any_io() {
        let h = harness().await;
        let result = h
            .engine
            .link(sid("S1"), "dapp", "abc", RELAY, BTreeMap::new())
            .await;
        assert!(matches!(result, Err(LinkError::InvalidSecret(_))));
        assert!(h.store.list().await.unwrap().is_empty());
        assert!(h.connector.relay_urls().is_empty());
    }

    #[tokio::test]
    async fn relay_url_spellings_share_one_link() {
        let h = harness().await;
        let first = h
            .engine
            .link(sid("S1"), "dapp", SECRET, "https://relay.example.org/", BTreeMap::new())
            .await
            .unwrap();
        h.engine
            .link(sid("S2"), "dapp", SECRET, "HTTPS://Relay.Example.org", BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(first.relay_url, RELAY);
        assert_eq!(h.connector.relay_urls(), vec![RELAY.to_string()]);
        assert_eq!(
            h.engine.connection_state("https://relay.example.org/"),
            Some(ConnectionState::Connected)
        );

        let mock = h.connector.mock(RELAY);
        mock.store_event(request_frame("S1", "E5", "req-5", "signEthereumMessage"));
        let fetched = h
            .engine
            .get_request(&eid("E5"), &sid("S1"), "https://relay.example.org/")
            .await
            .unwrap();
        assert_eq!(fetched.id.request_id, "req-5");
        assert_eq!(mock.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn duplicate_link_is_rejected() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let result = h
            .engine
            .link(sid("S1"), "dapp", SECRET, RELAY, BTreeMap::new())
            .await;
        assert!(matches!(result, Err(LinkError::DuplicateSession(id)) if id == sid("S1")));
    }

    #[tokio::test]
    async fn refused_subscription_rolls_back() {
        let h = harness().await;
        h.connector.mock(RELAY).reject_session(&sid("S1"));

        let result = h
            .engine
            .link(sid("S1"), "dapp", SECRET, RELAY, BTreeMap::new())
            .await;
        assert!(matches!(
            result,
            Err(LinkError::Transport(TransportError::Rejected(_)))
        ));
        assert!(h.store.list().await.unwrap().is_empty());
        assert!(h.engine.session(&sid("S1")).is_none());
        assert!(h.engine.connection_state(RELAY).is_none());
    }

    #[tokio::test]
    async fn link_requires_connected_engine() {
        let h = harness().await;
        h.engine.disconnect();
        let result = h
            .engine
            .link(sid("S1"), "dapp", SECRET, RELAY, BTreeMap::new())
            .await;
        assert!(matches!(
            result,
            Err(LinkError::Transport(TransportError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn link_then_unlink_restores_state() {
        let h = harness().await;
        link(&h, "S0", RELAY).await;
        let sessions_before = h.store.list().await.unwrap();
        let subscriptions_before = h.connector.mock(RELAY).subscriptions();

        link(&h, "S1", RELAY).await;
        h.engine.unlink(&sid("S1")).await.unwrap();

        assert_eq!(h.store.list().await.unwrap(), sessions_before);
        assert_eq!(h.connector.mock(RELAY).subscriptions(), subscriptions_before);
    }

    #[tokio::test]
    async fn unlink_unknown_session_fails() {
        let h = harness().await;
        let result = h.engine.unlink(&sid("nope")).await;
        assert!(matches!(result, Err(LinkError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn unlink_completes_locally_when_relay_stops_answering() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        mock.hold_replies(true);

        h.engine.unlink(&sid("S1")).await.unwrap();

        assert!(h.store.get(&sid("S1")).await.unwrap().is_none());
        assert!(h.engine.session(&sid("S1")).is_none());
        assert!(h.engine.connection_state(RELAY).is_none());
        let unsubscribed = mock.sent_frames().into_iter().any(|frame| {
            matches!(
                frame,
                walletlink_types::ClientFrame::Unsubscribe { session_id, .. }
                    if session_id == sid("S1")
            )
        });
        assert!(unsubscribed);
    }

    #[tokio::test]
    async fn unlink_ends_session_stream() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mut stream = h.engine.requests_for(&sid("S1")).unwrap();

        h.engine.unlink(&sid("S1")).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn sessions_survive_engine_restart() {
        let connector = MockConnector::new();
        let store = Arc::new(MemorySessionStore::new());
        {
            let engine = WalletLink::new(test_config(), store.clone(), Arc::new(connector.clone()))
                .await
                .unwrap();
            engine.connect(BTreeMap::new()).await.unwrap();
            engine
                .link(sid("S1"), "dapp", SECRET, RELAY, BTreeMap::new())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let engine = WalletLink::new(test_config(), store.clone(), Arc::new(connector.clone()))
            .await
            .unwrap();
        assert!(engine.session(&sid("S1")).is_some());
        engine.connect(BTreeMap::new()).await.unwrap();

        let mock = connector.mock(RELAY);
        wait_for(|| mock.subscriptions().contains(&sid("S1"))).await;
    }

    // ===========================================
    // Request Handling Tests
    // ===========================================

    #[tokio::test]
    async fn approve_then_redelivery_replays_cached_response() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();

        mock.push_event(request_frame("S1", "E1", "req-1", "requestEthereumAccounts"));
        let request = next_request(&mut stream).await;
        assert_eq!(request.id.event_id, eid("E1"));
        assert_eq!(request.origin.as_deref(), Some("https://dapp.example"));

        h.engine
            .approve_dapp_permission(&request.id, "0xabc")
            .await
            .unwrap();
        let sent = responses(&mock);
        assert_eq!(sent.len(), 1);
        let response = decrypt_response(&sent[0]);
        assert_eq!(response.id, "req-1");
        assert_eq!(response.response.result, Some(json!(["0xabc"])));
        assert_eq!(sent[0].event_id, eid("E1"));

        // Redelivery: replayed, not resurfaced
        mock.push_event(request_frame("S1", "E1", "req-1", "requestEthereumAccounts"));
        wait_for(|| responses(&mock).len() == 2).await;
        let replayed = responses(&mock);
        assert_eq!(replayed[1], replayed[0]);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn lagging_stream_catches_up_on_pending_requests() {
        let mut config = test_config();
        config.requests.stream_buffer = 2;
        let h = harness_with(config).await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();

        for n in 0..5 {
            let (event, request_id) = (format!("E{}", n), format!("req-{}", n));
            mock.push_event(request_frame("S1", &event, &request_id, "signEthereumMessage"));
        }
        wait_for(|| h.engine.inner.outstanding.pending(&sid("S1")).len() == 5).await;

        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(next_request(&mut stream).await.id.event_id.to_string());
        }
        received.sort();
        assert_eq!(received, vec!["E0", "E1", "E2", "E3", "E4"]);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_surfaces_once() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();

        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        mock.push_event(request_frame("S1", "E2", "req-2", "signEthereumMessage"));

        assert_eq!(next_request(&mut stream).await.id.event_id, eid("E1"));
        assert_eq!(next_request(&mut stream).await.id.event_id, eid("E2"));
    }

    #[tokio::test]
    async fn concurrent_responses_yield_one_transmission() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();
        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumTransaction"));
        let request = next_request(&mut stream).await;

        let (approved, rejected) = tokio::join!(
            h.engine.approve(&request.id, json!("0xsigned")),
            h.engine.reject(&request.id),
        );
        let outcomes = [approved.is_ok(), rejected.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let failure = if approved.is_err() { approved } else { rejected };
        assert!(matches!(failure, Err(LinkError::DuplicateResponse(_))));
        assert_eq!(responses(&mock).len(), 1);
    }

    #[tokio::test]
    async fn reject_sends_rejection_message() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();
        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        let request = next_request(&mut stream).await;

        h.engine.reject(&request.id).await.unwrap();
        let response = decrypt_response(&responses(&mock)[0]);
        assert_eq!(response.response.error_message.as_deref(), Some(REJECTED_MESSAGE));
        assert!(response.response.result.is_none());
    }

    #[tokio::test]
    async fn responding_to_unknown_request_fails() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let id = HostRequestId {
            session_id: sid("S1"),
            event_id: eid("E404"),
            request_id: "req".into(),
        };
        let result = h.engine.approve(&id, json!(null)).await;
        assert!(matches!(result, Err(LinkError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn failed_publish_allows_retry() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();
        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        let request = next_request(&mut stream).await;

        mock.fail_publishes(1);
        let first = h.engine.approve(&request.id, json!("0xsig")).await;
        assert!(matches!(
            first,
            Err(LinkError::Transport(TransportError::Rejected(_)))
        ));
        h.engine.approve(&request.id, json!("0xsig")).await.unwrap();
    }

    #[tokio::test]
    async fn undecryptable_event_is_dropped() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();

        let mut tampered = request_frame("S1", "E1", "req-1", "signEthereumMessage");
        let last = tampered.ciphertext.len() - 1;
        tampered.ciphertext[last] ^= 0xff;
        mock.push_event(tampered);
        mock.push_event(request_frame("S1", "E2", "req-2", "signEthereumMessage"));

        // The tampered event never surfaces, the next one does
        assert_eq!(next_request(&mut stream).await.id.event_id, eid("E2"));
    }

    #[tokio::test]
    async fn host_cancellation_is_surfaced() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut events = h.engine.events();
        let mut stream = h.engine.requests();
        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        let request = next_request(&mut stream).await;

        mock.push_event(cancel_frame("S1", "E2", "req-1"));
        let canceled = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(LinkEvent::RequestCanceled(id)) = events.recv().await {
                    return id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(canceled, request.id);
        assert!(matches!(
            h.engine.reject(&request.id).await,
            Err(LinkError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn restarted_stream_sees_pending_requests() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut first = h.engine.requests();
        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        next_request(&mut first).await;
        drop(first);

        let mut restarted = h.engine.requests_for(&sid("S1")).unwrap();
        assert_eq!(next_request(&mut restarted).await.id.event_id, eid("E1"));
    }

    #[tokio::test]
    async fn get_request_fetches_and_surfaces_once() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        mock.store_event(request_frame("S1", "E5", "req-5", "signEthereumMessage"));
        let mut stream = h.engine.requests();

        let request = h
            .engine
            .get_request(&eid("E5"), &sid("S1"), RELAY)
            .await
            .unwrap();
        assert_eq!(request.id.request_id, "req-5");
        assert_eq!(next_request(&mut stream).await, request);

        // Fetching again returns it without surfacing a duplicate
        let again = h
            .engine
            .get_request(&eid("E5"), &sid("S1"), RELAY)
            .await
            .unwrap();
        assert_eq!(again, request);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn get_request_for_answered_request_replays_response() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut stream = h.engine.requests();

        mock.push_event(request_frame("S1", "E1", "req-1", "signEthereumMessage"));
        let request = next_request(&mut stream).await;
        h.engine.approve(&request.id, json!("0xsig")).await.unwrap();
        assert_eq!(responses(&mock).len(), 1);

        let fetched = h
            .engine
            .get_request(&eid("E1"), &sid("S1"), RELAY)
            .await
            .unwrap();
        assert_eq!(fetched, request);
        wait_for(|| responses(&mock).len() == 2).await;
        let sent = responses(&mock);
        assert_eq!(sent[1], sent[0]);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn get_request_for_missing_event_fails() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let result = h.engine.get_request(&eid("E404"), &sid("S1"), RELAY).await;
        assert!(matches!(result, Err(LinkError::EventNotFound(_))));
    }

    // ===========================================
    // Metadata Tests
    // ===========================================

    fn pushed_addresses(mock: &MockTransport, session: &str) -> Vec<Vec<u8>> {
        mock.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                walletlink_types::ClientFrame::SetSessionConfig {
                    session_id,
                    metadata,
                    ..
                } if session_id == sid(session) => metadata
                    .get(&ClientMetadataKey::ETHEREUM_ADDRESS)
                    .map(|value| cipher().decrypt(value).unwrap()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn metadata_reaches_every_session_and_survives_reconnect() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        link(&h, "S2", OTHER_RELAY).await;

        h.engine
            .set_metadata(ClientMetadataKey::ETHEREUM_ADDRESS, "0xabc")
            .await
            .unwrap();

        for (session, relay) in [("S1", RELAY), ("S2", OTHER_RELAY)] {
            let stored = h.store.get(&sid(session)).await.unwrap().unwrap();
            assert_eq!(
                stored.metadata.get(&ClientMetadataKey::ETHEREUM_ADDRESS).map(String::as_str),
                Some("0xabc")
            );
            let pushed = pushed_addresses(&h.connector.mock(relay), session);
            assert_eq!(pushed.last().map(Vec::as_slice), Some(&b"0xabc"[..]));
        }

        // Reconnect resends the stored value
        let mock = h.connector.mock(RELAY);
        let before = pushed_addresses(&mock, "S1").len();
        mock.drop_connection();
        wait_for(|| pushed_addresses(&mock, "S1").len() > before).await;
        assert_eq!(
            pushed_addresses(&mock, "S1").last().map(Vec::as_slice),
            Some(&b"0xabc"[..])
        );
    }

    #[tokio::test]
    async fn metadata_set_offline_is_flushed_on_connect() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        h.engine.disconnect();
        let mock = h.connector.mock(RELAY);
        wait_for(|| !mock.is_connected()).await;

        h.engine
            .set_session_metadata(&sid("S1"), ClientMetadataKey::ETHEREUM_ADDRESS, "0xdef")
            .await
            .unwrap();
        assert!(pushed_addresses(&mock, "S1").is_empty());

        h.engine.connect(BTreeMap::new()).await.unwrap();
        wait_for(|| !pushed_addresses(&mock, "S1").is_empty()).await;
        assert_eq!(pushed_addresses(&mock, "S1")[0], b"0xdef");
    }

    #[tokio::test]
    async fn connect_applies_wallet_metadata() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let metadata = BTreeMap::from([(ClientMetadataKey::ETHEREUM_ADDRESS, "0x123".to_string())]);

        h.engine.connect(metadata).await.unwrap();
        let stored = h.store.get(&sid("S1")).await.unwrap().unwrap();
        assert_eq!(
            stored.metadata.get(&ClientMetadataKey::ETHEREUM_ADDRESS).map(String::as_str),
            Some("0x123")
        );
    }

    #[tokio::test]
    async fn broadcast_metadata_skips_session_being_unlinked() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        link(&h, "S2", RELAY).await;
        // Unlink removes the stored session before dropping it from the engine
        h.store.remove(&sid("S1")).await.unwrap();

        h.engine
            .set_metadata(ClientMetadataKey::ETHEREUM_ADDRESS, "0xabc")
            .await
            .unwrap();

        let stored = h.store.get(&sid("S2")).await.unwrap().unwrap();
        assert_eq!(
            stored.metadata.get(&ClientMetadataKey::ETHEREUM_ADDRESS).map(String::as_str),
            Some("0xabc")
        );
        let pushed = pushed_addresses(&h.connector.mock(RELAY), "S2");
        assert_eq!(pushed.last().map(Vec::as_slice), Some(&b"0xabc"[..]));
    }

    #[tokio::test]
    async fn set_metadata_on_unknown_session_fails() {
        let h = harness().await;
        let result = h
            .engine
            .set_session_metadata(&sid("S9"), ClientMetadataKey::ETHEREUM_ADDRESS, "0x0")
            .await;
        assert!(matches!(result, Err(LinkError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn notification_url_comes_from_config() {
        let h = harness().await;
        assert_eq!(
            h.engine.notification_url(),
            Some("https://push.example.org/notify")
        );
    }

    // ===========================================
    // Connectivity Tests
    // ===========================================

    #[tokio::test]
    async fn exhaustion_is_reported_and_retries_stop() {
        let h = harness().await;
        link(&h, "S1", RELAY).await;
        let mock = h.connector.mock(RELAY);
        let mut events = h.engine.events();

        mock.fail_connects(100);
        mock.drop_connection();

        let exhausted = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(event @ LinkEvent::ConnectivityExhausted { .. }) = events.recv().await {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            exhausted,
            LinkEvent::ConnectivityExhausted { ref relay_url, .. } if relay_url == RELAY
        ));
        assert_eq!(
            h.engine.connection_state(RELAY),
            Some(ConnectionState::Disconnected)
        );

        let attempts = mock.connect_attempts();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mock.connect_attempts(), attempts);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let h = harness().await;
        let mut events = h.engine.events();
        link(&h, "S1", RELAY).await;

        let connected = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(LinkEvent::StateChanged {
                    state: ConnectionState::Connected,
                    relay_url,
                }) = events.recv().await
                {
                    return relay_url;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(connected, RELAY);
    }
}
