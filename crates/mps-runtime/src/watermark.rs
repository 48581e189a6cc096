//! Per-marketplace sync watermarks.
//!
//! # Invariants
//!
//! - **Monotonic**: a watermark never moves backwards. Advancing to an
//!   older instant is a no-op that reports the current value.
//! - **Advances only on a completed pass**: the orchestrator calls
//!   [`WatermarkStore::advance`] after a pass finished without a fatal error,
//!   never before.
//! - The value is the *start* time of the pass that completed, so anything
//!   created during the pass is fetched again next time.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::MarketplaceId;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Pure watermark
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Watermark moved to the new instant (or it was the first one).
    Advanced,
    /// New instant was older than the current watermark; nothing changed.
    Behind { current: DateTime<Utc> },
}

impl Advance {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Advance::Advanced)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Watermark {
    at: Option<DateTime<Utc>>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.at
    }

    /// Probe without mutating.
    pub fn check(&self, to: DateTime<Utc>) -> Advance {
        match self.at {
            Some(current) if to < current => Advance::Behind { current },
            _ => Advance::Advanced,
        }
    }

    pub fn advance(&mut self, to: DateTime<Utc>) -> Advance {
        let decision = self.check(to);
        if decision.is_advanced() {
            self.at = Some(to);
        }
        decision
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self, m: MarketplaceId) -> Result<Option<DateTime<Utc>>>;

    /// Move the watermark of `m` forward to `to`. Returns the stored value,
    /// which is `to` unless the existing watermark was already later.
    async fn advance(&self, m: MarketplaceId, to: DateTime<Utc>) -> Result<DateTime<Utc>>;

    async fn all(&self) -> Result<BTreeMap<MarketplaceId, DateTime<Utc>>>;
}

#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    marks: RwLock<BTreeMap<MarketplaceId, Watermark>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn load(&self, m: MarketplaceId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.marks.read().await.get(&m).and_then(Watermark::at))
    }

    async fn advance(&self, m: MarketplaceId, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut marks = self.marks.write().await;
        let mark = marks.entry(m).or_default();
        match mark.advance(to) {
            Advance::Advanced => Ok(to),
            Advance::Behind { current } => Ok(current),
        }
    }

    async fn all(&self) -> Result<BTreeMap<MarketplaceId, DateTime<Utc>>> {
        Ok(self
            .marks
            .read()
            .await
            .iter()
            .filter_map(|(m, w)| w.at().map(|at| (*m, at)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn never_moves_backwards() {
        let t0 = Utc::now();
        let mut w = Watermark::new();
        assert_eq!(w.at(), None);
        assert!(w.advance(t0).is_advanced());
        assert_eq!(
            w.advance(t0 - Duration::seconds(1)),
            Advance::Behind { current: t0 }
        );
        assert_eq!(w.at(), Some(t0));
        assert!(w.advance(t0).is_advanced());
    }

    #[tokio::test]
    async fn store_reports_effective_value() {
        let store = InMemoryWatermarkStore::new();
        let t0 = Utc::now();
        assert_eq!(store.load(MarketplaceId::N11).await.unwrap(), None);
        assert_eq!(store.advance(MarketplaceId::N11, t0).await.unwrap(), t0);
        let earlier = t0 - Duration::minutes(5);
        assert_eq!(store.advance(MarketplaceId::N11, earlier).await.unwrap(), t0);
        assert_eq!(store.load(MarketplaceId::N11).await.unwrap(), Some(t0));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
