//! Error types for tdjson-client.

use std::{fmt, io};
use std::time::Duration;

use serde_json::Value;

// ─── TdError ──────────────────────────────────────────────────────────────────

/// An `error` object returned by TDLib in answer to a request.
///
/// # Example
/// `{"@type":"error","code":400,"message":"PHONE_CODE_INVALID"}`
/// → `TdError { code: 400, message: "PHONE_CODE_INVALID" }`
#[derive(Clone, Debug, PartialEq)]
pub struct TdError {
    /// HTTP-like status code.
    pub code:    i64,
    /// Error text as sent by TDLib.
    pub message: String,
}

impl fmt::Display for TdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TDLib {}: {}", self.code, self.message)
    }
}

impl std::error::Error for TdError {}

impl TdError {
    /// Extract an error from a TDLib answer, if it is one.
    pub fn from_update(update: &Value) -> Option<Self> {
        if update.get("@type").and_then(Value::as_str) != Some("error") {
            return None;
        }
        Some(Self {
            code:    update.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: update.get("message").and_then(Value::as_str).unwrap_or("").to_string(),
        })
    }

    /// Match on the message, with optional wildcard prefix/suffix `'*'`.
    ///
    /// - `err.is("PHONE_CODE_INVALID")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.message.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.message.ends_with(suffix)
        } else {
            self.message == pattern
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────────────────

/// The error type returned from any [`crate::Client`] call and from
/// [`crate::AsyncResult::wait`].
#[derive(Debug)]
pub enum Error {
    /// No answer arrived for `request_id` within `after`.
    Timeout { request_id: String, after: Duration },
    /// TDLib answered with an `error` object.
    Td(TdError),
    /// Login reached an authorization state it has no step for.
    UnsupportedAuthorizationState(String),
    /// An authorization update carried no `authorization_state.@type`.
    MissingAuthorizationState,
    /// A handle with this id is already pending; id generation is broken.
    DuplicateRequestId(String),
    /// `call_method` params were neither a JSON object nor null.
    InvalidParams(String),
    /// The client has been stopped.
    Stopped,
    /// Reading the login code or password failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { request_id, after } =>
                write!(f, "request {request_id} timed out after {after:?}"),
            Self::Td(e)                             => write!(f, "{e}"),
            Self::UnsupportedAuthorizationState(s)  => write!(f, "unsupported authorization state: {s}"),
            Self::MissingAuthorizationState         => write!(f, "authorization update without a state"),
            Self::DuplicateRequestId(id)            => write!(f, "request id {id} is already pending"),
            Self::InvalidParams(s)                  => write!(f, "invalid method params: {s}"),
            Self::Stopped                           => write!(f, "client stopped"),
            Self::Io(e)                             => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Td(e) => Some(e),
            Self::Io(e) => Some(e),
            _           => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<TdError> for Error {
    fn from(e: TdError) -> Self { Self::Td(e) }
}

impl Error {
    /// Returns `true` if this is a TDLib error whose message matches `pattern`
    /// (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Td(e) => e.is(pattern),
            _           => false,
        }
    }

    /// Returns `true` for [`Error::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ─── HandlerError ─────────────────────────────────────────────────────────────

/// What an update handler may fail with. Logged by the worker, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn td_error_from_error_object() {
        let e = TdError::from_update(&json!({
            "@type": "error", "code": 400, "message": "PHONE_CODE_INVALID",
        })).unwrap();
        assert_eq!(e.code, 400);
        assert!(e.is("PHONE_CODE_*"));
        assert!(e.is("*_INVALID"));
        assert!(!e.is("FLOOD_WAIT"));
    }

    #[test]
    fn non_error_updates_are_not_errors() {
        assert!(TdError::from_update(&json!({"@type": "ok"})).is_none());
        assert!(TdError::from_update(&json!({})).is_none());
    }
}
