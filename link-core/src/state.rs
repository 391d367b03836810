//! Relay connection state machine for WalletLink.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the lifecycle of one relay connection. The state machine takes events as
//! input and produces a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, subscribing, sleeping) is performed by
//! link-client, not by this module. This enables instant unit testing
//! without network mocks.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      │ ceiling reached        │ failed           │ transport lost
//!      └──────────────── Degraded(attempt) ◄───────┘
//! ```

use std::time::Duration;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// Failed attempts preceding this one (0 for a fresh connect).
        attempt: u32,
    },
    /// Transport is up and subscriptions have been restored.
    Connected,
    /// Connection lost, waiting to reconnect.
    Degraded {
        /// Consecutive failed attempts so far.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (link-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event, policy: &ReconnectPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, Event::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![Action::Connect])
            }

            // From Connecting
            (Self::Connecting { .. }, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    Action::Resubscribe,
                    Action::FlushMetadata,
                    Action::EmitEvent(ConnectionEvent::Connected),
                ],
            ),
            (Self::Connecting { attempt }, Event::ConnectFailed { error }) => {
                schedule_retry(attempt.saturating_add(1), error, policy)
            }

            // From Connected
            (Self::Connected, Event::TransportLost { reason }) => schedule_retry(1, reason, policy),

            // From Degraded
            (Self::Degraded { attempt }, Event::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![Action::Connect])
            }

            // Explicit disconnect is available from every state
            (Self::Disconnected, Event::DisconnectRequested) => (Self::Disconnected, vec![]),
            (Self::Degraded { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelReconnect,
                    Action::EmitEvent(ConnectionEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (_, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(ConnectionEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Degraded { .. })
    }

    /// Short lowercase label for logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Degraded { .. } => "degraded",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition into Degraded, or give up once the ceiling is exceeded.
fn schedule_retry(
    attempt: u32,
    error: String,
    policy: &ReconnectPolicy,
) -> (ConnectionState, Vec<Action>) {
    if attempt > policy.max_attempts {
        return (
            ConnectionState::Disconnected,
            vec![Action::EmitEvent(ConnectionEvent::ConnectivityExhausted {
                attempts: attempt,
                error,
            })],
        );
    }
    (
        ConnectionState::Degraded { attempt },
        vec![
            Action::EmitEvent(ConnectionEvent::ConnectionLost {
                attempt,
                error,
            }),
            Action::StartReconnectTimer {
                delay: policy.delay_for(attempt),
            },
        ],
    )
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Application requested connection.
    ConnectRequested,
    /// Transport connected and the relay accepted the handshake.
    ConnectSucceeded,
    /// Transport connection or handshake failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An established connection was lost.
    TransportLost {
        /// Reason for the loss.
        reason: String,
    },
    /// Application requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by link-client.
///
/// These are instructions, not side effects. link-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate transport connection.
    Connect,
    /// Close the transport.
    Disconnect,
    /// Subscribe again to every session routed through this relay.
    Resubscribe,
    /// Re-send every session's metadata to its host.
    FlushMetadata,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to the application.
    EmitEvent(ConnectionEvent),
}

/// Connection events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Successfully connected.
    Connected,
    /// Connection attempt failed or connection dropped; a retry is scheduled.
    ConnectionLost {
        /// Which consecutive failure this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// Disconnected on request.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Retry ceiling reached. No further attempts until an explicit connect.
    ConnectivityExhausted {
        /// Number of failed attempts.
        attempts: u32,
        /// Last error observed.
        error: String,
    },
}

/// Reconnection backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound for the random jitter added to each delay.
    pub max_jitter: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate reconnection backoff with jitter.
    ///
    /// Formula: min(max_delay, base_delay * 2^(attempt-1)) + random(0..=max_jitter)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_for(attempt) + self.jitter()
    }

    /// The exponential part of the delay, without jitter.
    pub fn base_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(random_u64() % (max_ms + 1))
    }
}

/// Random value for jitter; falls back to the clock if the OS RNG is unavailable.
fn random_u64() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(_) => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0),
    }
}
