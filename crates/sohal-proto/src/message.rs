//! JSON-RPC 2.0 envelope: request encoding and inbound frame decoding.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The protocol version tag required on every frame.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Outgoing request envelope.
#[derive(Clone, Debug, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    /// Correlation id, unique per connection lifetime.
    pub id: u64,
    /// Qualified method name, e.g. `projector.on` or `touchmat@1.open`.
    pub method: String,
    /// Positional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request envelope.
    ///
    /// SoHal expects `params` to be a JSON array; a non-array value is
    /// wrapped in a one-element array here so callers can pass single
    /// arguments directly.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        let params = params.map(|p| match p {
            Value::Array(_) => p,
            other => Value::Array(vec![other]),
        });
        Self {
            jsonrpc: PROTOCOL_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to the wire text.
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Structured error body carried by a JSON-RPC error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteErrorBody {
    /// Error code: a standard JSON-RPC code (see [`crate::codes`]) or a
    /// SoHal application code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-pushed event with no correlation id.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Qualified event name, e.g. `projector.on_state`.
    pub method: String,
    /// Event payload.
    pub params: Option<Value>,
}

impl Notification {
    /// Topic part of the method: everything before the first `.`.
    ///
    /// Device topics keep their index suffix, so `touchmat@1.on_touch`
    /// yields `touchmat@1`.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.method
            .split_once('.')
            .map_or(self.method.as_str(), |(topic, _)| topic)
    }

    /// Event part of the method: everything after the first `.`.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.method.split_once('.').map(|(_, event)| event)
    }

    /// The payload value, unwrapping the service's one-element param arrays.
    #[must_use]
    pub fn first_param(&self) -> Option<&Value> {
        match &self.params {
            Some(Value::Array(items)) => items.first(),
            other => other.as_ref(),
        }
    }
}

/// One decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Success response carrying the result payload.
    Response {
        /// Correlation id echoed from the request.
        id: u64,
        /// Result payload (may be JSON `null`).
        result: Value,
    },
    /// Error response. The id is `None` when the service could not read
    /// the request id (e.g. a parse error), in which case the frame cannot
    /// be correlated.
    Error {
        /// Correlation id echoed from the request, if the service had one.
        id: Option<u64>,
        /// Structured error body.
        error: RemoteErrorBody,
    },
    /// Server-initiated notification.
    Notification(Notification),
}

/// Decode failure for an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The payload is not well-formed JSON, or a field has the wrong shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The `jsonrpc` version tag is missing or not `"2.0"`.
    #[error("missing or unsupported jsonrpc version tag: {found:?}")]
    Version {
        /// The tag found on the frame, if any.
        found: Option<String>,
    },

    /// The frame carries both `result` and `error`.
    #[error("frame contains both result and error")]
    ResultAndError,

    /// The `id` field is neither an unsigned integer nor a string holding
    /// one, so the frame cannot be correlated.
    #[error("unusable correlation id: {0}")]
    InvalidId(Value),

    /// The frame matches none of the response/error/notification shapes.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Raw frame shape before discrimination. Every payload field distinguishes
/// "absent" from "present but null", which serde's plain `Option` folds
/// together.
#[derive(Deserialize)]
struct RawFrame {
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    error: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn parse_id(id: &Value) -> Result<u64, ProtoError> {
    match id {
        Value::Number(n) => n.as_u64().ok_or_else(|| ProtoError::InvalidId(id.clone())),
        Value::String(s) => s.parse().map_err(|_| ProtoError::InvalidId(id.clone())),
        _ => Err(ProtoError::InvalidId(id.clone())),
    }
}

/// Decode one inbound frame.
///
/// Frames are discriminated per the JSON-RPC 2.0 specification: a frame
/// with an `id` is a response (success or error); a frame without one is a
/// notification.
pub fn decode(text: &str) -> Result<Message, ProtoError> {
    let frame: RawFrame = serde_json::from_str(text)?;

    if frame.jsonrpc.as_deref() != Some(PROTOCOL_VERSION) {
        return Err(ProtoError::Version {
            found: frame.jsonrpc,
        });
    }
    if frame.result.is_some() && frame.error.is_some() {
        return Err(ProtoError::ResultAndError);
    }

    match frame.id {
        Some(id) => {
            if let Some(error) = frame.error {
                let error: RemoteErrorBody = serde_json::from_value(error)?;
                // A null id is legal on error responses the service could
                // not attribute to a request (e.g. parse errors).
                let id = match id {
                    Value::Null => None,
                    other => Some(parse_id(&other)?),
                };
                return Ok(Message::Error { id, error });
            }
            match frame.result {
                Some(result) => Ok(Message::Response {
                    id: parse_id(&id)?,
                    result,
                }),
                None => Err(ProtoError::Malformed(
                    "frame has an id but neither result nor error",
                )),
            }
        }
        None => {
            if frame.result.is_some() || frame.error.is_some() {
                return Err(ProtoError::Malformed(
                    "result or error frame without an id",
                ));
            }
            let Some(method) = frame.method else {
                return Err(ProtoError::Malformed("notification without a method"));
            };
            Ok(Message::Notification(Notification {
                method,
                params: frame.params,
            }))
        }
    }
}
