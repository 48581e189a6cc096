//! Request and response types for mps-daemon HTTP endpoints.
//!
//! No business logic lives here.

use mps_reconcile::RetryReport;
use mps_runtime::PassReport;
use mps_schemas::MarketplaceId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/sync/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRunQuery {
    /// Restrict the pass to one marketplace; all enabled ones otherwise.
    pub marketplace: Option<String>,
    /// Wait for the pass and return its reports instead of 202.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunResponse {
    pub started: bool,
    pub marketplace: Option<MarketplaceId>,
    /// Filled only when the caller waited for completion.
    pub reports: Vec<PassReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncCancelResponse {
    /// Whether a pass was running when the cancel arrived.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// /v1/reconcile/retry-unresolved
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RetryUnresolvedResponse {
    #[serde(flatten)]
    pub report: RetryReport,
    pub remaining: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
