//! Marketplace order lifecycle.
//!
//! # Design
//!
//! Every lifecycle event is applied via [`OrderRecord::apply`], which enforces
//! two invariants:
//!
//! 1. **Legal transitions only.** Illegal events return [`TransitionError`]
//!    and leave the record unchanged.
//! 2. **Idempotent replay.** An `event_id` that was already applied is a
//!    silent no-op.
//!
//! ```text
//!   Pending ──Import──► Imported ──Acknowledge──► Acknowledged ──Ship───► Shipped ───┐
//!                                                      │                              ├─Complete─► Completed
//!                                                      └──────Cancel──► Cancelled ────┘
//! ```
//!
//! A repeated `Import` on an order that is already `Imported` or later is a
//! no-op: marketplaces redeliver `order.created` freely. A repeated
//! `Acknowledge` on `Acknowledged` is likewise accepted.

use std::collections::HashSet;
use std::fmt;

use mps_schemas::{MarketplaceId, OrderLink};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Seen, local order not yet created.
    Pending,
    /// Local order created in the catalog.
    Imported,
    /// Acknowledged toward the marketplace.
    Acknowledged,
    Shipped,
    Cancelled,
    /// **Terminal.**
    Completed,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Imported => "imported",
            Self::Acknowledged => "acknowledged",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OrderEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// The catalog created the local order.
    Import { local_id: String },
    Acknowledge,
    Ship,
    Cancel,
    Complete,
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// An event that cannot legally be applied in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OrderState,
    pub event: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal order transition: {} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// OrderRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub marketplace: MarketplaceId,
    pub external_id: String,
    /// Set once the catalog created the local order.
    pub local_id: Option<String>,
    pub state: OrderState,
    applied: HashSet<String>,
}

impl OrderRecord {
    pub fn new(marketplace: MarketplaceId, external_id: impl Into<String>) -> Self {
        Self {
            marketplace,
            external_id: external_id.into(),
            local_id: None,
            state: OrderState::Pending,
            applied: HashSet::new(),
        }
    }

    pub fn link(&self) -> OrderLink {
        OrderLink {
            marketplace: self.marketplace,
            external_id: self.external_id.clone(),
            local_id: self.local_id.clone(),
        }
    }

    pub fn has_applied(&self, event_id: &str) -> bool {
        self.applied.contains(event_id)
    }

    /// Apply `event`. A duplicate `event_id` returns `Ok(())` without
    /// touching state.
    pub fn apply(&mut self, event: &OrderEvent, event_id: Option<&str>) -> Result<(), TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }
        Ok(())
    }

    fn do_transition(&mut self, event: &OrderEvent) -> Result<(), TransitionError> {
        use OrderEvent::*;
        use OrderState::*;

        match (self.state, event) {
            (Pending, Import { local_id }) => {
                self.local_id = Some(local_id.clone());
                self.state = Imported;
            }
            // Redelivered order.created.
            (Imported | Acknowledged | Shipped | Cancelled | Completed, Import { .. }) => {}

            (Imported, Acknowledge) => self.state = Acknowledged,
            (Acknowledged, Acknowledge) => {}

            (Acknowledged, Ship) => self.state = Shipped,
            (Acknowledged, Cancel) => self.state = Cancelled,

            (Shipped | Cancelled, Complete) => self.state = Completed,

            (state, ev) => {
                return Err(TransitionError {
                    from: state,
                    event: format!("{ev:?}"),
                });
            }
        }
        Ok(())
    }
}
