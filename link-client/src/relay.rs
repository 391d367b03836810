//! Relay connection manager.
//!
//! One [`RelayLink`] per relay URL multiplexes the subscriptions of every
//! session hosted on that relay. Each link runs two tasks:
//!
//! - a **supervisor** that feeds connection events into the pure
//!   [`ConnectionState`] machine and executes the resulting actions
//!   (connect, resubscribe, backoff timers)
//! - a **reader** that decodes inbound frames, completes pending request
//!   waiters, and forwards host events to the engine in arrival order
//!
//! [`RelayPool`] owns the links and creates them on demand.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use walletlink_core::{Action, ConnectionEvent, ConnectionState, Event, ReconnectPolicy};
use walletlink_types::{ClientFrame, EventFrame, EventId, RelayFrame, SessionId};

use crate::transport::{Connector, Transport, TransportError};

/// Notifications from relay links to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A host event arrived.
    Frame {
        /// Relay it arrived on.
        relay_url: String,
        /// The encrypted event.
        frame: EventFrame,
    },
    /// The link (re)connected and resubscribed; metadata should be re-sent.
    FlushMetadata {
        /// Relay that connected.
        relay_url: String,
    },
    /// The link changed state.
    StateChanged {
        /// Relay whose state changed.
        relay_url: String,
        /// New state.
        state: ConnectionState,
    },
    /// The link gave up reconnecting.
    Exhausted {
        /// Relay that became unreachable.
        relay_url: String,
        /// Failed attempts.
        attempts: u32,
        /// Last error.
        error: String,
    },
}

enum Command {
    Connect,
    Disconnect,
}

struct LinkShared {
    relay_url: String,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<RelayFrame>>,
    // session id -> session key
    subscriptions: Mutex<BTreeMap<SessionId, String>>,
    state: watch::Sender<ConnectionState>,
    ack_timeout: Duration,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl LinkShared {
    fn subscriptions(&self) -> MutexGuard<'_, BTreeMap<SessionId, String>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected() && self.transport.is_connected()
    }

    fn emit(&self, event: RelayEvent) {
        // The engine going away is not an error for the link.
        let _ = self.events.send(event);
    }

    /// Send a frame and wait for the relay's answer.
    async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientFrame,
    ) -> Result<RelayFrame, TransportError> {
        if !self.transport.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = build(id)
            .to_bytes()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.transport.send(&bytes).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(RelayFrame::Fail { error, .. })) => Err(TransportError::Rejected(error)),
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    fn dispatch(&self, frame: RelayFrame) {
        if let Some(id) = frame.reply_id() {
            match self.pending.remove(&id) {
                Some((_, waiter)) => {
                    // Waiter may have timed out meanwhile.
                    let _ = waiter.send(frame);
                }
                None => debug!("Dropping reply {} with no waiter on {}", id, self.relay_url),
            }
            return;
        }
        if let RelayFrame::Event(frame) = frame {
            self.emit(RelayEvent::Frame {
                relay_url: self.relay_url.clone(),
                frame,
            });
        }
    }

    async fn resubscribe(&self) -> Result<(), TransportError> {
        let subscriptions: Vec<(SessionId, String)> = self
            .subscriptions()
            .iter()
            .map(|(id, key)| (id.clone(), key.clone()))
            .collect();
        for (session_id, session_key) in subscriptions {
            let result = self
                .request(|id| ClientFrame::Subscribe {
                    id,
                    session_id: session_id.clone(),
                    session_key,
                })
                .await;
            match result {
                Ok(_) => debug!("Resubscribed session {} on {}", session_id, self.relay_url),
                Err(TransportError::Rejected(reason)) => {
                    warn!("Relay refused session {}: {}", session_id, reason)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Fail every in-flight request.
    fn fail_pending(&self) {
        // Dropping the senders wakes the waiters with ConnectionClosed.
        self.pending.clear();
    }
}

/// Connection to one relay, shared by every session hosted there.
pub struct RelayLink {
    shared: Arc<LinkShared>,
    commands: mpsc::UnboundedSender<Command>,
    supervisor: JoinHandle<()>,
}

impl RelayLink {
    /// Create a link and start its supervisor. The link stays
    /// disconnected until [`RelayLink::connect`] is called.
    pub fn spawn(
        relay_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        ack_timeout: Duration,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(LinkShared {
            relay_url: relay_url.into(),
            transport,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            subscriptions: Mutex::new(BTreeMap::new()),
            state,
            ack_timeout,
            events,
        });
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(Supervisor::new(Arc::clone(&shared), policy).run(commands_rx));
        Self {
            shared,
            commands,
            supervisor,
        }
    }

    /// Relay URL this link connects to.
    pub fn relay_url(&self) -> &str {
        &self.shared.relay_url
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether frames can be sent right now.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Start connecting (no-op if already connected or connecting).
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Disconnect and stop reconnecting until the next [`RelayLink::connect`].
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Wait until the link is connected, for at most `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut rx = self.shared.state.subscribe();
        let wait = async {
            loop {
                if rx.borrow_and_update().is_connected() {
                    return Ok(());
                }
                rx.changed()
                    .await
                    .map_err(|_| TransportError::ConnectionClosed)?;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::NotConnected)?
    }

    /// Register a session for subscription on every (re)connect without
    /// waiting for the relay.
    pub fn register(&self, session_id: &SessionId, session_key: &str) {
        self.shared
            .subscriptions()
            .insert(session_id.clone(), session_key.to_string());
    }

    /// Add a session to this relay and wait for the relay to confirm it.
    ///
    /// The session stays registered for automatic resubscription even if
    /// confirmation fails; callers roll back with [`RelayLink::unsubscribe`].
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        session_key: &str,
    ) -> Result<(), TransportError> {
        self.register(session_id, session_key);
        self.wait_connected(self.shared.ack_timeout).await?;
        self.shared
            .request(|id| ClientFrame::Subscribe {
                id,
                session_id: session_id.clone(),
                session_key: session_key.to_string(),
            })
            .await?;
        info!("Subscribed session {} on {}", session_id, self.relay_url());
        Ok(())
    }

    /// Remove a session, telling the relay when connected.
    pub async fn unsubscribe(&self, session_id: &SessionId) -> Result<(), TransportError> {
        let removed = self.shared.subscriptions().remove(session_id).is_some();
        if !removed || !self.is_connected() {
            return Ok(());
        }
        self.shared
            .request(|id| ClientFrame::Unsubscribe {
                id,
                session_id: session_id.clone(),
            })
            .await
            .map(|_| ())
    }

    /// Sessions registered on this link.
    pub fn subscriptions(&self) -> Vec<SessionId> {
        self.shared.subscriptions().keys().cloned().collect()
    }

    /// Whether any session is registered.
    pub fn has_subscriptions(&self) -> bool {
        !self.shared.subscriptions().is_empty()
    }

    /// Publish an event and wait for the relay's acknowledgment.
    pub async fn publish(&self, frame: EventFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared
            .request(|id| ClientFrame::Publish { id, frame })
            .await
            .map(|_| ())
    }

    /// Send a frame that expects a plain acknowledgment.
    pub async fn send_acked(
        &self,
        build: impl FnOnce(u64) -> ClientFrame,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared.request(build).await.map(|_| ())
    }

    /// Fetch one stored event.
    pub async fn get_event(
        &self,
        session_id: &SessionId,
        event_id: &EventId,
    ) -> Result<Option<EventFrame>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let reply = self
            .shared
            .request(|id| ClientFrame::GetEvent {
                id,
                session_id: session_id.clone(),
                event_id: event_id.clone(),
            })
            .await?;
        match reply {
            RelayFrame::EventResponse { event, .. } => Ok(event),
            other => Err(TransportError::ReceiveFailed(format!(
                "unexpected reply to GetEvent: {:?}",
                other
            ))),
        }
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.shared.fail_pending();
        let transport = Arc::clone(&self.shared.transport);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }
}

impl std::fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLink")
            .field("relay_url", &self.shared.relay_url)
            .field("state", &self.state())
            .finish()
    }
}

/// Drives one link's state machine.
struct Supervisor {
    shared: Arc<LinkShared>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    reconnect_at: Option<Instant>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
    lost_tx: mpsc::UnboundedSender<(u64, String)>,
    lost_rx: mpsc::UnboundedReceiver<(u64, String)>,
}

impl Supervisor {
    fn new(shared: Arc<LinkShared>, policy: ReconnectPolicy) -> Self {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            policy,
            state: ConnectionState::Disconnected,
            reconnect_at: None,
            reader: None,
            generation: 0,
            lost_tx,
            lost_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let timer = tokio::time::sleep_until(self.reconnect_at.unwrap_or_else(Instant::now));
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.apply(Event::ConnectRequested).await,
                    Some(Command::Disconnect) => self.apply(Event::DisconnectRequested).await,
                    None => break,
                },
                Some((generation, reason)) = self.lost_rx.recv() => {
                    if generation == self.generation {
                        self.teardown().await;
                        self.apply(Event::TransportLost { reason }).await;
                    }
                }
                _ = timer, if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.apply(Event::ReconnectTimer).await;
                }
            }
        }
        self.teardown().await;
        debug!("Supervisor for {} stopped", self.shared.relay_url);
    }

    async fn apply(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let (next, actions) = self.state.on_event(event, &self.policy);
            if next != self.state {
                info!(
                    "Relay {} {} -> {}",
                    self.shared.relay_url,
                    self.state.label(),
                    next.label()
                );
                self.state = next;
                self.shared.state.send_replace(next);
                self.shared.emit(RelayEvent::StateChanged {
                    relay_url: self.shared.relay_url.clone(),
                    state: next,
                });
            }
            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    queue.push_back(follow_up);
                    // A follow-up supersedes the rest of this batch.
                    break;
                }
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Connect => match self.shared.transport.connect(&self.shared.relay_url).await {
                Ok(()) => {
                    self.start_reader();
                    Some(Event::ConnectSucceeded)
                }
                Err(e) => {
                    warn!("Connecting to {} failed: {}", self.shared.relay_url, e);
                    Some(Event::ConnectFailed {
                        error: e.to_string(),
                    })
                }
            },
            Action::Resubscribe => match self.shared.resubscribe().await {
                Ok(()) => None,
                Err(e) => {
                    self.teardown().await;
                    Some(Event::TransportLost {
                        reason: format!("resubscribe failed: {}", e),
                    })
                }
            },
            Action::FlushMetadata => {
                self.shared.emit(RelayEvent::FlushMetadata {
                    relay_url: self.shared.relay_url.clone(),
                });
                None
            }
            Action::StartReconnectTimer { delay } => {
                debug!("Reconnecting to {} in {:?}", self.shared.relay_url, delay);
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::Disconnect => {
                self.teardown().await;
                None
            }
            Action::EmitEvent(event) => {
                self.report(event);
                None
            }
        }
    }

    fn report(&self, event: ConnectionEvent) {
        let relay_url = &self.shared.relay_url;
        match event {
            ConnectionEvent::Connected => info!("Connected to relay {}", relay_url),
            ConnectionEvent::ConnectionLost { attempt, error } => {
                warn!("Relay {} unavailable (attempt {}): {}", relay_url, attempt, error)
            }
            ConnectionEvent::Disconnected { reason } => {
                info!("Disconnected from relay {}: {}", relay_url, reason)
            }
            ConnectionEvent::ConnectivityExhausted { attempts, error } => {
                error!(
                    "Giving up on relay {} after {} attempts: {}",
                    relay_url, attempts, error
                );
                self.shared.emit(RelayEvent::Exhausted {
                    relay_url: relay_url.clone(),
                    attempts,
                    error,
                });
            }
        }
    }

    fn start_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.generation += 1;
        let generation = self.generation;
        let shared = Arc::clone(&self.shared);
        let lost = self.lost_tx.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                match shared.transport.recv().await {
                    Ok(bytes) => match RelayFrame::from_bytes(&bytes) {
                        Ok(frame) => shared.dispatch(frame),
                        Err(e) => debug!("Dropping undecodable frame from {}: {}", shared.relay_url, e),
                    },
                    Err(e) => {
                        let _ = lost.send((generation, e.to_string()));
                        break;
                    }
                }
            }
        }));
    }

    async fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // Stale loss reports from this connection are ignored from here on.
        self.generation += 1;
        self.shared.fail_pending();
        let _ = self.shared.transport.close().await;
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Owns one [`RelayLink`] per relay URL.
pub struct RelayPool {
    connector: Arc<dyn Connector>,
    links: Mutex<HashMap<String, Arc<RelayLink>>>,
    policy: ReconnectPolicy,
    ack_timeout: Duration,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayPool {
    /// Create an empty pool reporting to `events`.
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        ack_timeout: Duration,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> Self {
        Self {
            connector,
            links: Mutex::new(HashMap::new()),
            policy,
            ack_timeout,
            events,
        }
    }

    fn links(&self) -> MutexGuard<'_, HashMap<String, Arc<RelayLink>>> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a session on the link for `relay_url`, creating the link
    /// (disconnected) on first use.
    ///
    /// Registration happens under the pool lock so a concurrent
    /// [`RelayPool::detach`] never retires a link a session was just added to.
    pub fn attach(
        &self,
        relay_url: &str,
        session_id: &SessionId,
        session_key: &str,
    ) -> Arc<RelayLink> {
        let mut links = self.links();
        let link = match links.get(relay_url) {
            Some(link) => Arc::clone(link),
            None => {
                debug!("Creating relay link for {}", relay_url);
                let link = Arc::new(RelayLink::spawn(
                    relay_url,
                    self.connector.transport(relay_url),
                    self.policy,
                    self.ack_timeout,
                    self.events.clone(),
                ));
                links.insert(relay_url.to_string(), Arc::clone(&link));
                link
            }
        };
        link.register(session_id, session_key);
        link
    }

    /// The link for `relay_url`, if one exists.
    pub fn get(&self, relay_url: &str) -> Option<Arc<RelayLink>> {
        self.links().get(relay_url).cloned()
    }

    /// Every link in the pool.
    pub fn all(&self) -> Vec<Arc<RelayLink>> {
        self.links().values().cloned().collect()
    }

    /// Connect every link.
    pub fn connect_all(&self) {
        for link in self.all() {
            link.connect();
        }
    }

    /// Disconnect every link, keeping their subscriptions for later.
    pub fn disconnect_all(&self) {
        for link in self.all() {
            link.disconnect();
        }
    }

    /// Remove a session from its relay, shutting the link down when it was
    /// the last one. Relay errors are logged, not returned.
    pub async fn detach(&self, relay_url: &str, session_id: &SessionId) {
        let Some(link) = self.get(relay_url) else {
            return;
        };
        if let Err(e) = link.unsubscribe(session_id).await {
            warn!("Unsubscribing {} from {} failed: {}", session_id, relay_url, e);
        }
        let mut links = self.links();
        // Sessions only register under this lock, so the check is final.
        let current = links
            .get(relay_url)
            .is_some_and(|entry| Arc::ptr_eq(entry, &link));
        if current && !link.has_subscriptions() {
            info!("Closing relay link {} (no sessions left)", relay_url);
            links.remove(relay_url);
        }
    }

    /// Fetch one event, through the live link when connected, otherwise
    /// through a short-lived dedicated connection.
    pub async fn fetch_event(
        &self,
        relay_url: &str,
        session_id: &SessionId,
        session_key: &str,
        event_id: &EventId,
    ) -> Result<Option<EventFrame>, TransportError> {
        if let Some(link) = self.get(relay_url).filter(|link| link.is_connected()) {
            return link.get_event(session_id, event_id).await;
        }
        debug!("Fetching event {} from {} over a transient connection", event_id, relay_url);
        let transport = self.connector.transport(relay_url);
        transport.connect(relay_url).await?;
        let result = tokio::time::timeout(
            self.ack_timeout,
            fetch_once(transport.as_ref(), session_id, session_key, event_id),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));
        let _ = transport.close().await;
        result
    }
}

/// Subscribe and fetch over a bare transport with no reader task.
async fn fetch_once(
    transport: &dyn Transport,
    session_id: &SessionId,
    session_key: &str,
    event_id: &EventId,
) -> Result<Option<EventFrame>, TransportError> {
    let subscribe = ClientFrame::Subscribe {
        id: 1,
        session_id: session_id.clone(),
        session_key: session_key.to_string(),
    };
    let fetch = ClientFrame::GetEvent {
        id: 2,
        session_id: session_id.clone(),
        event_id: event_id.clone(),
    };
    for frame in [subscribe, fetch] {
        let bytes = frame
            .to_bytes()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        transport.send(&bytes).await?;
        loop {
            let reply = match RelayFrame::from_bytes(&transport.recv().await?) {
                Ok(reply) => reply,
                Err(_) => continue,
            };
            match reply {
                RelayFrame::Fail { id, error } if id == frame.id() => {
                    return Err(TransportError::Rejected(error))
                }
                RelayFrame::EventResponse { id, event } if id == frame.id() => return Ok(event),
                RelayFrame::Ack { id } if id == frame.id() => break,
                // Live events and stale replies are not ours to handle.
                _ => continue,
            }
        }
    }
    Err(TransportError::ReceiveFailed("relay never answered GetEvent".into()))
}
