//! mps-ingest
//!
//! Webhook Ingestor: verifies, parses, and hands marketplace webhooks to the
//! [`mps_reconcile::ReconcileEngine`], spilling into a bounded overflow queue
//! when the engine is saturated.

pub mod envelope;
pub mod ingestor;
pub mod queue;
pub mod signature;

pub use envelope::parse_event;
pub use ingestor::{Accepted, IngestStats, Rejected, WebhookIngestor, WebhookReply, WebhookResult};
pub use queue::{OverflowQueue, OverflowWorker, QueueStats};
pub use signature::SIGNATURE_HEADER;
