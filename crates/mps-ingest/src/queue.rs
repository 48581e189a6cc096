//! Bounded overflow queue for events the engine could not admit inline.
//!
//! # Invariants
//! - Never holds more than `capacity` events; a full queue refuses with
//!   `Backpressure` instead of blocking the webhook request.
//! - One worker drains it in arrival order through the waiting
//!   [`ReconcileEngine::apply`] path.
//! - A queued event was already acknowledged to its sender, so only
//!   `PermanentValidation` failures are dropped. Anything else is retried
//!   with backoff and then parked on the engine for the next pass.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mps_reconcile::{ApplyOutcome, ReconcileEngine};
use mps_schemas::{ErrorKind, InboundEvent, SyncError};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Counters {
    depth: AtomicUsize,
    drained: AtomicU64,
    retried: AtomicU64,
    parked: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub depth: usize,
    pub drained: u64,
    /// Extra attempts after a retryable failure.
    pub retried: u64,
    /// Handed to the engine's unresolved set after the last attempt failed.
    pub parked: u64,
    /// Dropped: permanently invalid, or could not even be parked.
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct OverflowQueue {
    tx: mpsc::Sender<InboundEvent>,
    capacity: usize,
    counters: Arc<Counters>,
}

/// Receiving half, handed to [`OverflowWorker::spawn`].
pub struct OverflowWorker {
    rx: mpsc::Receiver<InboundEvent>,
    counters: Arc<Counters>,
    attempts: u32,
    base_delay: Duration,
}

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

impl OverflowQueue {
    pub fn bounded(capacity: usize) -> (Self, OverflowWorker) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        (
            Self {
                tx,
                capacity,
                counters: counters.clone(),
            },
            OverflowWorker {
                rx,
                counters,
                attempts: DEFAULT_ATTEMPTS,
                base_delay: DEFAULT_BASE_DELAY,
            },
        )
    }

    pub fn try_enqueue(&self, event: InboundEvent) -> Result<(), SyncError> {
        let marketplace = event.marketplace;
        let external_id = event.external_id.clone();
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.depth.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(SyncError::backpressure()
                .with_marketplace(marketplace)
                .with_entity(external_id)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SyncError::internal("overflow worker stopped").with_marketplace(marketplace))
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            depth: self.counters.depth.load(Ordering::SeqCst),
            drained: self.counters.drained.load(Ordering::SeqCst),
            retried: self.counters.retried.load(Ordering::SeqCst),
            parked: self.counters.parked.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

impl OverflowWorker {
    /// Attempts per event (at least one) and the first backoff delay, which
    /// doubles per attempt up to five seconds.
    pub fn with_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Drain until every [`OverflowQueue`] handle is dropped.
    pub fn spawn(mut self, engine: Arc<ReconcileEngine>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.rx.recv().await {
                let result = self.apply_with_retry(&engine, &event).await;
                self.counters.depth.fetch_sub(1, Ordering::SeqCst);
                match result {
                    Ok(outcome) => {
                        self.counters.drained.fetch_add(1, Ordering::SeqCst);
                        if outcome == ApplyOutcome::Parked {
                            tracing::debug!(external_id = %event.external_id, "queued event parked");
                        }
                    }
                    Err(e) if e.kind == ErrorKind::PermanentValidation => {
                        self.counters.failed.fetch_add(1, Ordering::SeqCst);
                        tracing::error!(
                            marketplace = %event.marketplace,
                            event_type = %event.event_type,
                            external_id = %event.external_id,
                            error = %e,
                            "queued event invalid; dropped"
                        );
                    }
                    Err(e) => self.park(&engine, event, &e).await,
                }
            }
            tracing::info!("overflow worker stopped");
        })
    }

    async fn apply_with_retry(
        &self,
        engine: &ReconcileEngine,
        event: &InboundEvent,
    ) -> Result<ApplyOutcome, SyncError> {
        let mut attempt = 1;
        loop {
            let err = match engine.apply(event).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };
            if attempt >= self.attempts || !requeueable(&err) {
                return Err(err);
            }
            let delay = self.backoff(attempt);
            tracing::warn!(
                marketplace = %event.marketplace,
                external_id = %event.external_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "queued event failed; retrying"
            );
            self.counters.retried.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    async fn park(&self, engine: &ReconcileEngine, event: InboundEvent, error: &SyncError) {
        let (marketplace, external_id) = (event.marketplace, event.external_id.clone());
        match engine.park_failed(event, error).await {
            Ok(()) => {
                self.counters.parked.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    marketplace = %marketplace,
                    external_id = %external_id,
                    error = %error,
                    "queued event parked after retries"
                );
            }
            Err(park_err) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    marketplace = %marketplace,
                    external_id = %external_id,
                    error = %error,
                    park_error = %park_err,
                    "queued event lost: could not be parked"
                );
            }
        }
    }
}

fn requeueable(e: &SyncError) -> bool {
    e.is_retryable() || matches!(e.kind, ErrorKind::Internal | ErrorKind::Backpressure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let (_queue, worker) = OverflowQueue::bounded(1);
        let worker = worker.with_retry(6, Duration::from_millis(400));
        assert_eq!(worker.backoff(1), Duration::from_millis(400));
        assert_eq!(worker.backoff(2), Duration::from_millis(800));
        assert_eq!(worker.backoff(5), MAX_DELAY);
    }

    #[test]
    fn only_validation_failures_are_final() {
        assert!(requeueable(&SyncError::internal("catalog down")));
        assert!(!requeueable(&SyncError::permanent("qty must be >= 0")));
    }
}
