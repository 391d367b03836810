//! Outstanding request table.
//!
//! Tracks every host request the engine has surfaced, keyed by
//! (session id, event id), through its delivery lifecycle:
//!
//! ```text
//! Delivered ──begin_response──► Responding ──complete_response──► Responded{cached}
//!     ▲                             │
//!     └──────── abort_response ─────┘
//! ```
//!
//! Responded entries are kept for a retention window so that a relay
//! redelivery can be answered with the cached response. The table never
//! grows beyond its capacity.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use walletlink_core::{HostRequest, HostRequestId};
use walletlink_types::{EventFrame, EventId, SessionId};

/// Default retention of responded entries.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Default maximum number of tracked requests.
pub const DEFAULT_CAPACITY: usize = 10_000;

type Key = (SessionId, EventId);

/// Delivery state of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Surfaced to the application, no answer yet.
    Delivered,
    /// A response is being transmitted.
    Responding,
    /// The relay acknowledged the response.
    Responded {
        /// The exact frame that was published, for replay.
        cached: EventFrame,
    },
}

#[derive(Debug)]
struct Tracked {
    request: HostRequest,
    state: DeliveryState,
    delivered_at: Instant,
    responded_at: Option<Instant>,
}

/// Outcome of observing an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// First sighting; the request must be surfaced.
    New,
    /// Already surfaced and still awaiting an answer.
    Pending,
    /// Already answered; the cached response should be retransmitted.
    Responded(EventFrame),
}

/// Why a response could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRejected {
    /// Unknown or expired request.
    NotFound,
    /// Another response is in flight or already sent.
    Duplicate,
}

/// Concurrent table of surfaced host requests.
#[derive(Debug)]
pub struct OutstandingRequests {
    entries: DashMap<Key, Tracked>,
    retention: Duration,
    capacity: usize,
}

impl OutstandingRequests {
    /// Create an empty table.
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            capacity: capacity.max(1),
        }
    }

    fn key(id: &HostRequestId) -> Key {
        (id.session_id.clone(), id.event_id.clone())
    }

    /// Record an inbound request, reporting whether it was seen before.
    pub fn observe(&self, request: &HostRequest, now: Instant) -> Observation {
        let key = Self::key(&request.id);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room(now);
        }

        match self.entries.entry(key) {
            Entry::Occupied(entry) => match &entry.get().state {
                DeliveryState::Responded { cached } => Observation::Responded(cached.clone()),
                DeliveryState::Delivered | DeliveryState::Responding => Observation::Pending,
            },
            Entry::Vacant(entry) => {
                entry.insert(Tracked {
                    request: request.clone(),
                    state: DeliveryState::Delivered,
                    delivered_at: now,
                    responded_at: None,
                });
                Observation::New
            }
        }
    }

    /// Claim the right to respond. Exactly one caller wins per request.
    pub fn begin_response(&self, id: &HostRequestId) -> Result<HostRequest, ResponseRejected> {
        let mut entry = self
            .entries
            .get_mut(&Self::key(id))
            .ok_or(ResponseRejected::NotFound)?;
        if entry.request.id.request_id != id.request_id {
            return Err(ResponseRejected::NotFound);
        }
        match entry.state {
            DeliveryState::Delivered => {
                entry.state = DeliveryState::Responding;
                Ok(entry.request.clone())
            }
            DeliveryState::Responding | DeliveryState::Responded { .. } => {
                Err(ResponseRejected::Duplicate)
            }
        }
    }

    /// Mark a response as acknowledged, caching what was sent.
    pub fn complete_response(&self, id: &HostRequestId, cached: EventFrame, now: Instant) {
        if let Some(mut entry) = self.entries.get_mut(&Self::key(id)) {
            entry.state = DeliveryState::Responded { cached };
            entry.responded_at = Some(now);
        }
    }

    /// Return a request to `Delivered` after a failed transmission.
    pub fn abort_response(&self, id: &HostRequestId) {
        if let Some(mut entry) = self.entries.get_mut(&Self::key(id)) {
            if entry.state == DeliveryState::Responding {
                entry.state = DeliveryState::Delivered;
            }
        }
    }

    /// Drop a pending request the host withdrew.
    ///
    /// Requests already being answered are left alone.
    pub fn cancel(&self, session_id: &SessionId, request_id: &str) -> Option<HostRequest> {
        let key = self
            .entries
            .iter()
            .find(|e| {
                &e.key().0 == session_id
                    && e.request.id.request_id == request_id
                    && e.state == DeliveryState::Delivered
            })
            .map(|e| e.key().clone())?;
        self.entries
            .remove_if(&key, |_, e| e.state == DeliveryState::Delivered)
            .map(|(_, e)| e.request)
    }

    /// Current state of a request.
    pub fn state(&self, id: &HostRequestId) -> Option<DeliveryState> {
        self.entries
            .get(&Self::key(id))
            .map(|entry| entry.state.clone())
    }

    /// The stored request for an id.
    pub fn request(&self, id: &HostRequestId) -> Option<HostRequest> {
        self.entries
            .get(&Self::key(id))
            .map(|entry| entry.request.clone())
    }

    /// Requests of a session still awaiting an answer, oldest first.
    pub fn pending(&self, session_id: &SessionId) -> Vec<HostRequest> {
        let mut pending: Vec<(Instant, HostRequest)> = self
            .entries
            .iter()
            .filter(|e| &e.key().0 == session_id && e.state == DeliveryState::Delivered)
            .map(|e| (e.delivered_at, e.request.clone()))
            .collect();
        pending.sort_by_key(|(at, _)| *at);
        pending.into_iter().map(|(_, request)| request).collect()
    }

    /// Forget everything about a session.
    pub fn remove_session(&self, session_id: &SessionId) {
        self.entries.retain(|key, _| &key.0 != session_id);
    }

    /// Drop responded entries older than the retention window.
    pub fn purge(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let retention = self.retention;
        self.entries.retain(|_, e| match e.responded_at {
            Some(at) => now.saturating_duration_since(at) < retention,
            None => true,
        });
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self, now: Instant) {
        if self.purge(now) > 0 && self.entries.len() < self.capacity {
            return;
        }
        // Oldest responded first, then oldest delivered. In-flight entries stay.
        let victim = self
            .entries
            .iter()
            .filter_map(|e| match (&e.state, e.responded_at) {
                (DeliveryState::Responded { .. }, Some(at)) => Some((0u8, at, e.key().clone())),
                (DeliveryState::Delivered, _) => Some((1u8, e.delivered_at, e.key().clone())),
                _ => None,
            })
            .min_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
            .map(|(_, _, key)| key);
        if let Some(key) = victim {
            debug!("Outstanding table full, evicting {}/{}", key.0, key.1);
            self.entries.remove(&key);
        }
    }

    /// Number of tracked requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OutstandingRequests {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_CAPACITY)
    }
}
