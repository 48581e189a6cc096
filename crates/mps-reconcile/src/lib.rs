//! mps-reconcile
//!
//! Brings local catalog state in line with marketplace events: imports
//! orders, applies stock updates last-writer-wins on event time, dedupes
//! through an [`EventLedger`], and parks events whose product link is not
//! known yet.

pub mod catalog;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod memory;
pub mod order;
pub mod payload;
pub mod stock;
pub mod unresolved;

pub use catalog::{Catalog, ImportContext, MarketplaceProduct, ProductLinks};
pub use engine::{ApplyOutcome, ImportReport, ReconcileEngine, ResultTally, RetryReport};
pub use ledger::{EventLedger, InMemoryLedger};
pub use locks::KeyedLocks;
pub use memory::{InMemoryCatalog, InMemoryProductLinks, StoredOrder};
pub use order::{OrderEvent, OrderRecord, OrderState, TransitionError};
pub use stock::{StockDecision, StockRegister, StockSource, StockWrite};
pub use unresolved::{InMemoryUnresolved, ParkedEvent, UnresolvedStore};
