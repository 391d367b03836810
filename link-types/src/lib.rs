//! # link-types
//!
//! Wire format types for the WalletLink relay protocol.
//!
//! This crate provides the foundational types used across all WalletLink crates:
//! - [`SessionId`], [`EventId`] - Identity types
//! - [`ClientMetadataKey`] - Open set of metadata keys exposed to hosts
//! - [`ClientFrame`], [`RelayFrame`] - Frames exchanged with the relay
//! - [`EventPayload`] - Encrypted payloads carried inside events
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;
mod metadata;
mod web3;

pub use error::WireError;
pub use frames::{ClientFrame, EventFrame, EventName, RelayFrame, PROTOCOL_VERSION};
pub use ids::{EventId, SessionId};
pub use metadata::ClientMetadataKey;
pub use web3::{
    EventPayload, Web3Request, Web3RequestBody, Web3RequestCanceled, Web3Response,
    Web3ResponseBody,
};
