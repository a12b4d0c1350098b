//! JSON-RPC 2.0 envelopes exchanged over a transport.
//!
//! A message is either a fire-and-forget notification, a correlated request
//! carrying an id, or the response to such a request.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::Value;

/// Method names used on the wire, in both directions.
pub mod methods {
    // server -> client
    pub const REPLACE_COMPONENT_STATES: &str = "replaceComponentStates";
    pub const UPDATE_COMPONENT_STATES: &str = "updateComponentStates";
    pub const EVALUATE_JAVASCRIPT: &str = "evaluateJavaScript";
    pub const GET_COMPONENT_LAYOUTS: &str = "getComponentLayouts";
    pub const SESSION_ESTABLISHED: &str = "sessionEstablished";
    pub const INVALID_SESSION: &str = "invalidSession";

    // client -> server
    pub const HANDSHAKE: &str = "handshake";
    pub const COMPONENT_EVENT: &str = "componentEvent";
    pub const COMPONENT_STATE_UPDATE: &str = "componentStateUpdate";
    pub const NAVIGATE: &str = "navigate";
    pub const PING: &str = "ping";

    // either direction
    pub const CLOSE_SESSION: &str = "closeSession";
}

/// The `"jsonrpc": "2.0"` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "2.0" {
            Ok(Version)
        } else {
            Err(de::Error::custom(format!("unsupported jsonrpc version {raw:?}")))
        }
    }
}

/// Request identifier. The server always issues numbers; clients may use
/// strings for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Version,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: Version,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Collapse into a `Result`; a missing result is read as `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Any message on the wire.
///
/// Variant order matters for untagged decoding: a request carries both `id`
/// and `method`, a response only `id`, a notification only `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Envelope {
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Envelope::Notification(Notification {
            jsonrpc: Version,
            method: method.into(),
            params,
        })
    }

    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Envelope::Request(Request {
            jsonrpc: Version,
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    pub fn response_ok(id: RequestId, result: Value) -> Self {
        Envelope::Response(Response {
            jsonrpc: Version,
            id,
            result: Some(result),
            error: None,
        })
    }

    pub fn response_err(id: RequestId, error: RpcError) -> Self {
        Envelope::Response(Response {
            jsonrpc: Version,
            id,
            result: None,
            error: Some(error),
        })
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }

    pub fn params(&self) -> Option<&Value> {
        match self {
            Envelope::Request(r) => Some(&r.params),
            Envelope::Notification(n) => Some(&n.params),
            Envelope::Response(_) => None,
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
