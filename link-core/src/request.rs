//! Host requests: parsing decrypted events and building responses.
//!
//! A host event decrypts to a JSON [`EventPayload`]. Requests become
//! [`HostRequest`] values the application decides on; the decision is
//! turned back into a [`Web3Response`] by the builders here.

use serde_json::Value;
use std::fmt;
use thiserror::Error;
use walletlink_types::{
    EventId, EventPayload, SessionId, Web3Request, Web3Response, Web3ResponseBody, WireError,
};

/// Error message sent to the host when the user rejects a request.
pub const REJECTED_MESSAGE: &str = "User rejected request";

/// Errors from turning a decrypted event into a host message.
#[derive(Debug, Error)]
pub enum RequestParseError {
    /// Plaintext is not a valid payload document.
    #[error("malformed payload: {0}")]
    Malformed(#[from] WireError),
    /// The host sent something only a wallet should send.
    #[error("unexpected {0} payload from host")]
    Unexpected(&'static str),
    /// Request carried an empty id or method.
    #[error("request is missing its {0}")]
    Missing(&'static str),
}

/// Identifies one host request across the whole engine.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostRequestId {
    /// Session the request arrived on.
    pub session_id: SessionId,
    /// Relay event that carried it; responses are published under the same id.
    pub event_id: EventId,
    /// Host-assigned request id, echoed in the response payload.
    pub request_id: String,
}

impl fmt::Debug for HostRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostRequestId({}/{}#{})",
            self.session_id, self.event_id, self.request_id
        )
    }
}

impl fmt::Display for HostRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.event_id)
    }
}

/// What the host is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequestKind {
    /// Account access (EIP-1102).
    DappPermission,
    /// Sign an arbitrary message.
    SignMessage,
    /// Sign a transaction without submitting it.
    SignTransaction,
    /// Submit an already signed transaction.
    SubmitSignedTransaction,
    /// Any method this crate does not classify.
    Other(String),
}

impl HostRequestKind {
    /// Classify a method name.
    pub fn from_method(method: &str) -> Self {
        match method {
            "requestEthereumAccounts" => Self::DappPermission,
            "signEthereumMessage" => Self::SignMessage,
            "signEthereumTransaction" => Self::SignTransaction,
            "submitEthereumTransaction" => Self::SubmitSignedTransaction,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A decoded, pending request from a host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRequest {
    /// Correlation id.
    pub id: HostRequestId,
    /// Classified method.
    pub kind: HostRequestKind,
    /// Method name as sent by the host.
    pub method: String,
    /// Origin of the dApp page, if the host supplied one.
    pub origin: Option<String>,
    /// Method parameters, opaque to the engine.
    pub params: Value,
}

/// Anything a host can send the wallet.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    /// A new request.
    Request(HostRequest),
    /// The host withdrew an earlier request.
    Canceled {
        /// Session the cancellation arrived on.
        session_id: SessionId,
        /// Host-assigned id of the withdrawn request.
        request_id: String,
    },
}

impl HostMessage {
    /// Parse the decrypted plaintext of a host event.
    pub fn parse(
        session_id: &SessionId,
        event_id: &EventId,
        plaintext: &[u8],
    ) -> Result<Self, RequestParseError> {
        match EventPayload::from_json(plaintext)? {
            EventPayload::Request(request) => {
                HostRequest::from_web3(session_id.clone(), event_id.clone(), request)
                    .map(Self::Request)
            }
            EventPayload::Canceled(canceled) => Ok(Self::Canceled {
                session_id: session_id.clone(),
                request_id: canceled.id,
            }),
            EventPayload::Response(_) => Err(RequestParseError::Unexpected("response")),
        }
    }
}

impl HostRequest {
    /// Build from a decoded request payload.
    pub fn from_web3(
        session_id: SessionId,
        event_id: EventId,
        request: Web3Request,
    ) -> Result<Self, RequestParseError> {
        if request.id.is_empty() {
            return Err(RequestParseError::Missing("id"));
        }
        if request.request.method.is_empty() {
            return Err(RequestParseError::Missing("method"));
        }
        Ok(Self {
            id: HostRequestId {
                session_id,
                event_id,
                request_id: request.id,
            },
            kind: HostRequestKind::from_method(&request.request.method),
            method: request.request.method,
            origin: request.origin,
            params: request.request.params,
        })
    }

    /// Successful response carrying `result`.
    pub fn approve(&self, result: Value) -> EventPayload {
        self.respond(Some(result), None)
    }

    /// Permission grant exposing one account address.
    pub fn approve_dapp_permission(&self, address: &str) -> EventPayload {
        self.respond(Some(Value::Array(vec![Value::String(address.to_string())])), None)
    }

    /// Rejection response.
    pub fn reject(&self) -> EventPayload {
        self.respond(None, Some(REJECTED_MESSAGE.to_string()))
    }

    fn respond(&self, result: Option<Value>, error_message: Option<String>) -> EventPayload {
        EventPayload::Response(Web3Response {
            id: self.id.request_id.clone(),
            response: Web3ResponseBody {
                method: self.method.clone(),
                result,
                error_message,
            },
        })
    }
}
