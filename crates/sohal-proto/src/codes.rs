//! JSON-RPC 2.0 standard error codes.
//!
//! SoHal additionally uses application-specific codes (for example `0x200`
//! "unable to connect" or device-specific failures); those pass through
//! unmapped in [`crate::RemoteErrorBody::code`].

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Name of a standard code, or `None` for application-defined codes.
#[must_use]
pub fn standard_name(code: i64) -> Option<&'static str> {
    match code {
        PARSE_ERROR => Some("parse error"),
        INVALID_REQUEST => Some("invalid request"),
        METHOD_NOT_FOUND => Some("method not found"),
        INVALID_PARAMS => Some("invalid params"),
        INTERNAL_ERROR => Some("internal error"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes_named() {
        assert_eq!(standard_name(PARSE_ERROR), Some("parse error"));
        assert_eq!(standard_name(METHOD_NOT_FOUND), Some("method not found"));
        assert_eq!(standard_name(INVALID_PARAMS), Some("invalid params"));
    }

    #[test]
    fn application_codes_unnamed() {
        assert_eq!(standard_name(0x200), None);
        assert_eq!(standard_name(0), None);
    }
}
