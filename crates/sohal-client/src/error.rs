//! Caller-visible error taxonomy.
//!
//! Transport and codec failures are translated into these kinds at the
//! boundary where they occur; no raw `tungstenite` or `serde_json` error
//! crosses the crate boundary.

use sohal_proto::{ProtoError, RemoteErrorBody};

/// Any failure surfaced to a caller of the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The link could not be established or used.
    #[error("connection error: {0}")]
    Connection(String),

    /// An outbound payload violated the JSON-RPC envelope.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// The service answered the call with a JSON-RPC error response.
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(RemoteErrorBody),

    /// No response arrived within the caller's deadline.
    #[error("call timed out")]
    Timeout,

    /// The session was torn down while the call was outstanding, or the
    /// call was issued after teardown.
    #[error("connection closed")]
    Closed,

    /// The caller withdrew the call before completion.
    #[error("call cancelled")]
    Cancelled,
}

impl ClientError {
    /// The remote error body, if this is a service-reported failure.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteErrorBody> {
        match self {
            Self::Remote(body) => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_error_display() {
        let err = ClientError::Remote(RemoteErrorBody {
            code: 0x200,
            message: "Unable to connect to SoHal".into(),
            data: None,
        });
        assert_eq!(
            err.to_string(),
            "remote error 512: Unable to connect to SoHal"
        );
    }

    #[test]
    fn remote_accessor() {
        let err = ClientError::Remote(RemoteErrorBody {
            code: -32602,
            message: "invalid params".into(),
            data: Some(json!(["brightness"])),
        });
        let body = err.remote().unwrap();
        assert_eq!(body.code, -32602);
        assert!(ClientError::Timeout.remote().is_none());
    }

    #[test]
    fn protocol_error_wraps_decode_failure() {
        let proto = sohal_proto::decode("{nope").unwrap_err();
        let err: ClientError = proto.into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
