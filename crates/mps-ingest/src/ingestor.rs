//! Webhook ingestion as a plain function returning a typed result.
//!
//! # Contract
//! - Signature first (when a secret is configured), then parsing, then the
//!   engine. Nothing reaches the engine unless the previous steps passed.
//! - Engine saturation spills into the [`OverflowQueue`]; only a full queue
//!   is reported to the sender as backpressure.
//! - [`WebhookReply`] carries the HTTP status and JSON body. Transport code
//!   does not re-derive them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mps_config::secrets::ResolvedSecrets;
use mps_reconcile::{ApplyOutcome, ReconcileEngine};
use mps_schemas::{ErrorKind, MarketplaceId, SyncError};
use serde::Serialize;
use serde_json::{json, Value};

use crate::envelope;
use crate::queue::{OverflowQueue, QueueStats};
use crate::signature;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Applied,
    Duplicate,
    /// Waiting for a product link; kept for retry.
    Parked,
    /// Older than the last applied stock write.
    Stale,
    Queued,
    UnknownType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejected {
    InvalidSignature,
    Invalid(SyncError),
    Backpressure(SyncError),
    Failed(SyncError),
}

pub type WebhookResult = Result<Accepted, Rejected>;

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    pub status: u16,
    pub body: Value,
}

impl WebhookReply {
    pub fn from_result(result: &WebhookResult) -> Self {
        match result {
            Ok(Accepted::Applied) | Ok(Accepted::Stale) => Self::ok(json!({"success": true})),
            Ok(Accepted::Duplicate) => Self::ok(json!({"success": true, "duplicate": true})),
            Ok(Accepted::Parked) => Self::ok(json!({"success": true, "parked": true})),
            Ok(Accepted::Queued) => Self::ok(json!({"success": true, "queued": true})),
            Ok(Accepted::UnknownType) => Self::ok(json!({"error": "Unknown webhook type"})),
            Err(Rejected::InvalidSignature) => Self {
                status: 401,
                body: json!({"error": "Invalid signature"}),
            },
            Err(Rejected::Invalid(e)) => Self {
                status: 400,
                body: json!({"error": e.message}),
            },
            Err(Rejected::Backpressure(_)) => Self {
                status: 503,
                body: json!({"error": "Backpressure"}),
            },
            Err(Rejected::Failed(e)) => Self {
                status: 500,
                body: json!({"error": e.message, "kind": e.kind.as_str()}),
            },
        }
    }

    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    applied: AtomicU64,
    duplicates: AtomicU64,
    queued: AtomicU64,
    unknown_type: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub queued: u64,
    pub unknown_type: u64,
    pub rejected: u64,
    pub overflow: QueueStats,
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

pub struct WebhookIngestor {
    engine: Arc<ReconcileEngine>,
    secrets: BTreeMap<MarketplaceId, String>,
    overflow: OverflowQueue,
    counters: Counters,
}

impl WebhookIngestor {
    pub fn new(engine: Arc<ReconcileEngine>, overflow: OverflowQueue) -> Self {
        Self {
            engine,
            secrets: BTreeMap::new(),
            overflow,
            counters: Counters::default(),
        }
    }

    /// Require `X-Signature` on webhooks from `m`.
    pub fn with_secret(mut self, m: MarketplaceId, secret: impl Into<String>) -> Self {
        self.secrets.insert(m, secret.into());
        self
    }

    /// Take every configured webhook secret.
    pub fn with_secrets(mut self, secrets: &ResolvedSecrets) -> Self {
        for (m, s) in &secrets.marketplaces {
            if let Some(ws) = &s.webhook_secret {
                self.secrets.insert(*m, ws.clone());
            }
        }
        self
    }

    pub fn requires_signature(&self, m: MarketplaceId) -> bool {
        self.secrets.contains_key(&m)
    }

    pub async fn handle(
        &self,
        marketplace: MarketplaceId,
        body: &[u8],
        signature: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> WebhookResult {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let result = self.handle_inner(marketplace, body, signature, received_at).await;
        let counter = match &result {
            Ok(Accepted::Applied) | Ok(Accepted::Stale) | Ok(Accepted::Parked) => &self.counters.applied,
            Ok(Accepted::Duplicate) => &self.counters.duplicates,
            Ok(Accepted::Queued) => &self.counters.queued,
            Ok(Accepted::UnknownType) => &self.counters.unknown_type,
            Err(_) => &self.counters.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn handle_inner(
        &self,
        marketplace: MarketplaceId,
        body: &[u8],
        signature: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> WebhookResult {
        if let Some(secret) = self.secrets.get(&marketplace) {
            let valid = signature.is_some_and(|sig| signature::verify(secret, body, sig));
            if !valid {
                tracing::warn!(marketplace = %marketplace, "webhook signature rejected");
                return Err(Rejected::InvalidSignature);
            }
        }

        let event = match envelope::parse_event(marketplace, body, received_at) {
            Ok(ev) => ev,
            Err(e) if e.kind == ErrorKind::UnknownEventType => {
                tracing::warn!(marketplace = %marketplace, error = %e, "unknown webhook type");
                return Ok(Accepted::UnknownType);
            }
            Err(e) => {
                tracing::warn!(marketplace = %marketplace, error = %e, "invalid webhook");
                return Err(Rejected::Invalid(e));
            }
        };

        match self.engine.try_apply(&event).await {
            Ok(ApplyOutcome::Applied) | Ok(ApplyOutcome::AlreadyImported) => Ok(Accepted::Applied),
            Ok(ApplyOutcome::Duplicate) => Ok(Accepted::Duplicate),
            Ok(ApplyOutcome::Parked) => Ok(Accepted::Parked),
            Ok(ApplyOutcome::Stale) => Ok(Accepted::Stale),
            Err(e) if e.kind == ErrorKind::Backpressure => match self.overflow.try_enqueue(event) {
                Ok(()) => {
                    tracing::info!(marketplace = %marketplace, "engine saturated; webhook queued");
                    Ok(Accepted::Queued)
                }
                Err(full) if full.kind == ErrorKind::Backpressure => {
                    tracing::warn!(marketplace = %marketplace, "overflow queue full");
                    Err(Rejected::Backpressure(full))
                }
                Err(other) => Err(Rejected::Failed(other)),
            },
            Err(e) if e.kind == ErrorKind::PermanentValidation => Err(Rejected::Invalid(e)),
            Err(e) => Err(Rejected::Failed(e)),
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            received: self.counters.received.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Relaxed),
            unknown_type: self.counters.unknown_type.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            overflow: self.overflow.stats(),
        }
    }
}
