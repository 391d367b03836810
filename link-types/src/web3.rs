//! Payloads carried, encrypted, inside relay events.
//!
//! These are JSON documents. The relay never sees them in the clear.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Decrypted content of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    /// Host asks the wallet to act.
    #[serde(rename = "WEB3_REQUEST")]
    Request(Web3Request),
    /// Host withdrew a request.
    #[serde(rename = "WEB3_REQUEST_CANCELED")]
    Canceled(Web3RequestCanceled),
    /// Wallet answers a request.
    #[serde(rename = "WEB3_RESPONSE")]
    Response(Web3Response),
}

impl EventPayload {
    /// Encode as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A host request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Web3Request {
    /// Host-generated request id, echoed in the response.
    pub id: String,
    /// Origin of the dApp that issued the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// The requested action.
    pub request: Web3RequestBody,
}

/// Method and parameters of a host request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Web3RequestBody {
    /// Method name, e.g. `requestEthereumAccounts`.
    pub method: String,
    /// Method parameters, opaque to the engine.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A host cancellation of an earlier request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Web3RequestCanceled {
    /// Id of the request being withdrawn.
    pub id: String,
    /// Origin of the dApp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// A wallet response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Web3Response {
    /// Id of the request being answered.
    pub id: String,
    /// Outcome.
    pub response: Web3ResponseBody,
}

/// Outcome of a request: either a result or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Web3ResponseBody {
    /// Method being answered.
    pub method: String,
    /// Result value on approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_host_request_json() {
        let raw = json!({
            "type": "WEB3_REQUEST",
            "id": "42",
            "origin": "https://dapp.example",
            "request": {
                "method": "signEthereumMessage",
                "params": { "message": "0x68656c6c6f" }
            }
        });
        let payload = EventPayload::from_json(raw.to_string().as_bytes()).unwrap();
        match payload {
            EventPayload::Request(req) => {
                assert_eq!(req.id, "42");
                assert_eq!(req.origin.as_deref(), Some("https://dapp.example"));
                assert_eq!(req.request.method, "signEthereumMessage");
                assert_eq!(req.request.params["message"], "0x68656c6c6f");
            }
            other => panic!("Expected Request, got {:?}", other),
        }
    }

    #[test]
    fn params_default_to_null() {
        let raw = r#"{"type":"WEB3_REQUEST","id":"1","request":{"method":"requestEthereumAccounts"}}"#;
        let payload = EventPayload::from_json(raw.as_bytes()).unwrap();
        let EventPayload::Request(req) = payload else {
            panic!("Expected Request");
        };
        assert!(req.request.params.is_null());
    }

    #[test]
    fn response_uses_camel_case_error_message() {
        let payload = EventPayload::Response(Web3Response {
            id: "1".into(),
            response: Web3ResponseBody {
                method: "signEthereumMessage".into(),
                result: None,
                error_message: Some("User rejected".into()),
            },
        });
        let json: serde_json::Value = serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "WEB3_RESPONSE");
        assert_eq!(json["response"]["errorMessage"], "User rejected");
        assert!(json["response"].get("result").is_none());
    }

    #[test]
    fn unknown_payload_type_is_an_error() {
        let raw = r#"{"type":"SOMETHING_ELSE","id":"1"}"#;
        assert!(matches!(
            EventPayload::from_json(raw.as_bytes()),
            Err(WireError::Payload(_))
        ));
    }
}
