use chrono::{DateTime, Utc};
use mps_schemas::{ErrorKind, MarketplaceId, SyncError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// No fatal error; the watermark advanced.
    Completed,
    /// A fatal error stopped the pass; the watermark stayed put.
    Failed,
    /// Cancelled between calls; the watermark stayed put.
    Cancelled,
}

/// Outcome of one marketplace's share of a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub marketplace: MarketplaceId,
    pub status: PassStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Watermark used as `since` for `list_orders`.
    pub since: Option<DateTime<Utc>>,
    /// Watermark after the pass. Equal to `since` unless completed.
    pub watermark: Option<DateTime<Utc>>,
    pub orders_fetched: u32,
    pub orders_imported: u32,
    pub orders_duplicate: u32,
    pub orders_acknowledged: u32,
    pub pushed: u32,
    pub push_failed: u32,
    /// Dirty skus the marketplace does not list; they stay dirty.
    pub unknown_skus: Vec<String>,
    /// Parked events of this marketplace resolved by the end-of-pass retry.
    pub unresolved_applied: u32,
    /// Parked events of this marketplace still waiting after that retry.
    pub unresolved_remaining: u32,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl PassReport {
    pub(crate) fn start(marketplace: MarketplaceId, started_at: DateTime<Utc>) -> Self {
        Self {
            marketplace,
            status: PassStatus::Completed,
            started_at,
            finished_at: started_at,
            since: None,
            watermark: None,
            orders_fetched: 0,
            orders_imported: 0,
            orders_duplicate: 0,
            orders_acknowledged: 0,
            pushed: 0,
            push_failed: 0,
            unknown_skus: Vec::new(),
            unresolved_applied: 0,
            unresolved_remaining: 0,
            error_kind: None,
            error: None,
        }
    }

    pub(crate) fn fail(mut self, e: &SyncError) -> Self {
        self.status = PassStatus::Failed;
        self.error_kind = Some(e.kind);
        self.error = Some(e.to_string());
        self.watermark = self.since;
        self.finished_at = Utc::now();
        self
    }

    pub(crate) fn cancel(mut self) -> Self {
        self.status = PassStatus::Cancelled;
        self.watermark = self.since;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == PassStatus::Completed
    }
}
