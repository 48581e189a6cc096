//! Adapter-level failures and their retry classification.
//!
//! Adapters speak [`CallError`]: what went wrong on the wire. The client
//! turns each one into a [`Failure`], which pairs the taxonomy error
//! surfaced to callers with the [`Classification`] the retry executor acts on.

use std::fmt;
use std::time::Duration;

use mps_schemas::{AuthFailure, SyncError};

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// A single failed wire call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The call did not finish within the client's per-call timeout.
    Timeout(String),
    /// Connection refused/reset, DNS, TLS.
    Transport(String),
    /// The marketplace answered with a non-success HTTP status.
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    /// A response payload could not be decoded.
    Decode(String),
    /// The marketplace answered 2xx but reported an application-level error.
    Rejected(String),
}

impl CallError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        CallError::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// 401/403: the marketplace refused the credentials or token.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, CallError::Status { status: 401 | 403, .. })
    }

    /// Decide how the retry executor treats this error.
    ///
    /// `token_in_use` distinguishes an expired session token (refresh and
    /// retry once) from rejected static credentials (surface immediately).
    pub fn classify(&self, token_in_use: bool) -> Classification {
        match self {
            CallError::Timeout(_) | CallError::Transport(_) => Classification::Transient,
            CallError::Status { status, .. } => match *status {
                401 | 403 if token_in_use => Classification::AuthExpired,
                401 | 403 => Classification::Fatal,
                408 | 429 => Classification::Transient,
                s if s >= 500 => Classification::Transient,
                _ => Classification::Fatal,
            },
            CallError::Decode(_) | CallError::Rejected(_) => Classification::Fatal,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map onto the shared taxonomy.
    pub fn to_sync_error(&self) -> SyncError {
        match self {
            CallError::Timeout(m) => SyncError::transient(format!("timeout: {m}")),
            CallError::Transport(m) => SyncError::transient(format!("transport: {m}")),
            CallError::Status {
                status: 429,
                message,
                ..
            } => SyncError::rate_limited(format!("http 429: {message}")),
            CallError::Status {
                status: 401 | 403,
                message,
                ..
            } => SyncError::auth(AuthFailure::InvalidCredentials, format!("http auth rejected: {message}")),
            CallError::Status { status, message, .. } if *status >= 500 || *status == 408 => {
                SyncError::transient(format!("http {status}: {message}"))
            }
            CallError::Status { status, message, .. } => {
                SyncError::permanent(format!("http {status}: {message}"))
            }
            CallError::Decode(m) => SyncError::permanent(format!("decode: {m}")),
            CallError::Rejected(m) => SyncError::permanent(format!("rejected: {m}")),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout(m) => write!(f, "timeout: {m}"),
            CallError::Transport(m) => write!(f, "transport error: {m}"),
            CallError::Status {
                status, message, ..
            } => write!(f, "http {status}: {message}"),
            CallError::Decode(m) => write!(f, "decode error: {m}"),
            CallError::Rejected(m) => write!(f, "marketplace rejected request: {m}"),
        }
    }
}

impl std::error::Error for CallError {}

// ---------------------------------------------------------------------------
// Classification / Failure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Timeouts, 5xx, 408/429, connection reset: back off and retry.
    Transient,
    /// The session token was refused: refresh once, then retry once.
    AuthExpired,
    /// Validation, not-found, invalid credentials, queue overflow: surface now.
    Fatal,
}

/// One failed attempt as seen by the retry executor.
#[derive(Debug, Clone)]
pub struct Failure {
    pub class: Classification,
    pub error: SyncError,
    pub retry_after: Option<Duration>,
}

impl Failure {
    pub fn from_call(err: &CallError, token_in_use: bool) -> Self {
        Self {
            class: err.classify(token_in_use),
            error: err.to_sync_error(),
            retry_after: err.retry_after(),
        }
    }

    pub fn fatal(error: SyncError) -> Self {
        Self {
            class: Classification::Fatal,
            error,
            retry_after: None,
        }
    }

    pub fn transient(error: SyncError) -> Self {
        Self {
            class: Classification::Transient,
            error,
            retry_after: None,
        }
    }

    /// Failures raised by the credential store while obtaining a session.
    pub fn from_auth(error: SyncError) -> Self {
        if error.kind.is_retryable() {
            Self::transient(error)
        } else {
            Self::fatal(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mps_schemas::ErrorKind;

    #[test]
    fn server_errors_are_transient() {
        for s in [500, 502, 503, 504, 408, 429] {
            assert_eq!(
                CallError::status(s, "x").classify(false),
                Classification::Transient,
                "status {s}"
            );
        }
        assert_eq!(
            CallError::Timeout("10s".into()).classify(true),
            Classification::Transient
        );
    }

    #[test]
    fn client_errors_are_fatal() {
        for s in [400, 404, 409, 422] {
            assert_eq!(CallError::status(s, "x").classify(true), Classification::Fatal);
        }
        assert_eq!(
            CallError::Decode("eof".into()).classify(false),
            Classification::Fatal
        );
    }

    #[test]
    fn unauthorized_depends_on_token() {
        let e = CallError::status(401, "expired");
        assert_eq!(e.classify(true), Classification::AuthExpired);
        assert_eq!(e.classify(false), Classification::Fatal);
        assert_eq!(
            e.to_sync_error().kind,
            ErrorKind::Auth(AuthFailure::InvalidCredentials)
        );
    }

    #[test]
    fn taxonomy_mapping() {
        assert_eq!(
            CallError::status(429, "slow down").to_sync_error().kind,
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(
            CallError::status(503, "down").to_sync_error().kind,
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            CallError::status(422, "bad barcode").to_sync_error().kind,
            ErrorKind::PermanentValidation
        );
    }
}
