//! mps-runtime
//!
//! Sync Orchestrator: drives pull/push passes per marketplace on top of the
//! clients from `mps-client` and the engine from `mps-reconcile`, guarded by
//! monotonic per-marketplace watermarks.

pub mod dirty;
pub mod orchestrator;
pub mod pricing;
pub mod report;
pub mod watermark;

pub use dirty::DirtySet;
pub use orchestrator::SyncOrchestrator;
pub use pricing::{outbound_price, outbound_qty};
pub use report::{PassReport, PassStatus};
pub use watermark::{Advance, InMemoryWatermarkStore, Watermark, WatermarkStore};
