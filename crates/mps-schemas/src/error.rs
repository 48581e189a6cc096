//! Error taxonomy shared by every layer of the engine.
//!
//! [`ErrorKind`] is the fieldless discriminant carried in `SyncResult` and
//! persisted/serialized; [`SyncError`] is the full error value with the
//! context a caller needs to act on it (marketplace, operation, entity id and,
//! after retry exhaustion, the number of attempts made).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MarketplaceId, Operation};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Why authentication failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    /// Credentials are missing, revoked, or rejected by the marketplace.
    InvalidCredentials,
    /// The marketplace's auth endpoint could not be reached or answered 5xx.
    TemporarilyUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth(AuthFailure),
    RateLimitExceeded,
    TransientNetwork,
    PermanentValidation,
    UnknownEventType,
    MappingNotFound,
    MappingLowConfidence,
    /// The reconciliation engine is saturated; the caller should queue.
    Backpressure,
    /// A collaborator (catalog, store) failed in a way outside the taxonomy.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth(AuthFailure::InvalidCredentials) => "auth_invalid_credentials",
            ErrorKind::Auth(AuthFailure::TemporarilyUnavailable) => "auth_temporarily_unavailable",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::PermanentValidation => "permanent_validation",
            ErrorKind::UnknownEventType => "unknown_event_type",
            ErrorKind::MappingNotFound => "mapping_not_found",
            ErrorKind::MappingLowConfidence => "mapping_low_confidence",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::Internal => "internal",
        }
    }

    /// Kinds the retry executor absorbs before surfacing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork
                | ErrorKind::RateLimitExceeded
                | ErrorKind::Auth(AuthFailure::TemporarilyUnavailable)
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub marketplace: Option<MarketplaceId>,
    pub operation: Option<Operation>,
    pub entity_id: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if let Some(m) = self.marketplace {
            write!(f, "marketplace={m}")?;
            sep = " ";
        }
        if let Some(op) = self.operation {
            write!(f, "{sep}operation={op}")?;
            sep = " ";
        }
        if let Some(id) = &self.entity_id {
            write!(f, "{sep}entity={id}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

/// The error value surfaced by clients, the resolver, the engine, and the
/// ingestor.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncError {
    pub kind: ErrorKind,
    pub context: ErrorContext,
    pub message: String,
    /// Attempts made before surfacing. `0` when no outbound call was involved.
    pub attempts: u32,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::default(),
            message: message.into(),
            attempts: 0,
        }
    }

    pub fn auth(failure: AuthFailure, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth(failure), message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentValidation, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimitExceeded, message)
    }

    pub fn unknown_event_type(event_type: &str) -> Self {
        Self::new(
            ErrorKind::UnknownEventType,
            format!("Unknown webhook type '{event_type}'"),
        )
    }

    pub fn mapping_not_found(local_id: &str) -> Self {
        Self::new(ErrorKind::MappingNotFound, "no mapping for local entity")
            .with_entity(local_id)
    }

    pub fn low_confidence(local_id: &str, best: f64, threshold: f64) -> Self {
        Self::new(
            ErrorKind::MappingLowConfidence,
            format!("best candidate scored {best:.2} below threshold {threshold:.2}"),
        )
        .with_entity(local_id)
    }

    pub fn backpressure() -> Self {
        Self::new(ErrorKind::Backpressure, "reconciliation engine saturated")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_marketplace(mut self, m: MarketplaceId) -> Self {
        self.context.marketplace = Some(m);
        self
    }

    pub fn with_operation(mut self, op: Operation) -> Self {
        self.context.operation = Some(op);
        self
    }

    pub fn with_entity(mut self, id: impl Into<String>) -> Self {
        self.context.entity_id = Some(id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let ctx = self.context.to_string();
        if !ctx.is_empty() {
            write!(f, " [{ctx}]")?;
        }
        if self.attempts > 0 {
            write!(f, " after {} attempt(s)", self.attempts)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for SyncError {}
