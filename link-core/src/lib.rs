//! # link-core
//!
//! Pure logic for WalletLink (no I/O, instant tests).
//!
//! This crate implements the state machine and validation rules for the
//! wallet side of a WalletLink session without any network or disk I/O,
//! enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relay connections, encryption, storage) is performed by
//! `link-client`, which interprets the actions produced by these state
//! machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pairing;
pub mod request;
pub mod session;
pub mod state;

pub use pairing::{LinkPayload, PairingError, LINK_PAYLOAD_VERSION};
pub use request::{
    HostMessage, HostRequest, HostRequestId, HostRequestKind, RequestParseError, REJECTED_MESSAGE,
};
pub use session::{
    normalize_relay_url, validate_relay_url, SecretError, Session, SessionSecret,
};
pub use state::{Action, ConnectionEvent, ConnectionState, Event, ReconnectPolicy};
