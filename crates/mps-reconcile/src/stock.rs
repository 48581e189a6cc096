//! Last-writer-wins stock register, one per product.
//!
//! # Invariants
//! - **Non-decreasing**: a write is accepted only if its timestamp is at or
//!   after the last accepted write for that product.
//! - **Advances only on commit**: a rejected (stale) write leaves the
//!   register as it was.
//! - Local and marketplace writes share the same register; arrival order is
//!   irrelevant.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockSource {
    Local,
    Marketplace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockWrite {
    pub qty: i64,
    pub at: DateTime<Utc>,
    pub source: StockSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockDecision {
    Accept,
    Stale {
        last_at: DateTime<Utc>,
        got_at: DateTime<Utc>,
    },
}

impl StockDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, StockDecision::Accept)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StockRegister {
    last: Option<StockWrite>,
}

impl StockRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freshness probe. Does not mutate.
    pub fn check(&self, at: DateTime<Utc>) -> StockDecision {
        match &self.last {
            Some(last) if at < last.at => StockDecision::Stale {
                last_at: last.at,
                got_at: at,
            },
            _ => StockDecision::Accept,
        }
    }

    /// Record a write that was checked and carried out.
    pub fn commit(&mut self, write: StockWrite) -> StockDecision {
        let decision = self.check(write.at);
        if decision.is_accept() {
            self.last = Some(write);
        }
        decision
    }

    pub fn last(&self) -> Option<&StockWrite> {
        self.last.as_ref()
    }
}
