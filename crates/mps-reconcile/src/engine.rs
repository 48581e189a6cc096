//! Reconciliation engine: applies marketplace events to catalog state.
//!
//! # Invariants
//! - **Idempotent**: an event whose key is in the ledger is a no-op
//!   ([`ApplyOutcome::Duplicate`]). Keys are recorded only after the event's
//!   effect is durable in the catalog.
//! - Stock events with a [synthetic id](InboundEvent::synthetic_id) bypass
//!   the ledger. They are duplicates only while the product's last applied
//!   write is the same marketplace quantity.
//! - **Per-entity serialization**: every mutation holds the keyed lock of its
//!   order (`order:<marketplace>:<id>`) or product (`stock:<sku>`).
//! - **Last writer wins on event time**: a stock event older than the last
//!   applied write for that product is dropped as [`ApplyOutcome::Stale`].
//! - **Nothing is discarded for lack of a link**: stock events for unlinked
//!   skus are parked and are not marked processed. Parked events are written
//!   through to the [`UnresolvedStore`] before the caller is answered.
//! - Completed orders leave the in-memory order table. The ledger keeps the
//!   order id itself as processed, so a late redelivery stays a no-op.
//! - **Bounded concurrency**: at most `max_in_flight` applications run at
//!   once; [`ReconcileEngine::try_apply`] refuses with `Backpressure` rather
//!   than waiting.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use mps_config::EngineSettings;
use mps_schemas::{
    ErrorKind, EventKey, EventType, InboundEvent, MarketplaceId, Operation, RemoteOrder,
    SyncError, SyncResult,
};
use serde::Serialize;
use tokio::sync::{Semaphore, TryAcquireError};

use crate::catalog::{Catalog, ImportContext, ProductLinks};
use crate::ledger::EventLedger;
use crate::locks::KeyedLocks;
use crate::order::{OrderEvent, OrderRecord, OrderState};
use crate::payload;
use crate::stock::{StockDecision, StockRegister, StockSource, StockWrite};
use crate::unresolved::{InMemoryUnresolved, ParkedEvent, UnresolvedStore};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    /// Event key already in the ledger.
    Duplicate,
    /// `order.created` for an order that is already imported.
    AlreadyImported,
    /// Older than the last applied stock write.
    Stale,
    /// No product link yet; kept for [`ReconcileEngine::retry_unresolved`].
    Parked,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::AlreadyImported => "already_imported",
            Self::Stale => "stale",
            Self::Parked => "parked",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub imported: u32,
    pub duplicates: u32,
    /// First failure; orders after it were not attempted.
    pub failure: Option<SyncError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub applied: u32,
    pub still_parked: u32,
    pub failed: u32,
}

/// Running tally of client results per (marketplace, operation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTally {
    pub marketplace: MarketplaceId,
    pub operation: Operation,
    pub succeeded: u64,
    pub failed: u64,
    pub last_error: Option<ErrorKind>,
    pub last_finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ReconcileEngine {
    catalog: Arc<dyn Catalog>,
    links: Arc<dyn ProductLinks>,
    ledger: Arc<dyn EventLedger>,
    parked_store: Arc<dyn UnresolvedStore>,
    accounts: HashMap<MarketplaceId, String>,
    orders: Mutex<HashMap<(MarketplaceId, String), OrderRecord>>,
    stock: Mutex<HashMap<String, StockRegister>>,
    unresolved: Mutex<BTreeMap<EventKey, ParkedEvent>>,
    results: Mutex<BTreeMap<(MarketplaceId, Operation), ResultTally>>,
    locks: KeyedLocks,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn collaborator(what: &str, e: anyhow::Error) -> SyncError {
    SyncError::internal(format!("{what}: {e:#}"))
}

impl ReconcileEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        links: Arc<dyn ProductLinks>,
        ledger: Arc<dyn EventLedger>,
        max_in_flight: usize,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            catalog,
            links,
            ledger,
            parked_store: Arc::new(InMemoryUnresolved::new()),
            accounts: HashMap::new(),
            orders: Mutex::new(HashMap::new()),
            stock: Mutex::new(HashMap::new()),
            unresolved: Mutex::new(BTreeMap::new()),
            results: Mutex::new(BTreeMap::new()),
            locks: KeyedLocks::new(),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn from_settings(
        catalog: Arc<dyn Catalog>,
        links: Arc<dyn ProductLinks>,
        ledger: Arc<dyn EventLedger>,
        settings: &EngineSettings,
    ) -> Self {
        Self::new(catalog, links, ledger, settings.max_in_flight)
    }

    /// Account id stamped into [`ImportContext`] for orders from `m`.
    pub fn with_account(mut self, m: MarketplaceId, account_id: impl Into<String>) -> Self {
        self.accounts.insert(m, account_id.into());
        self
    }

    /// Persist parked events in `store` instead of process memory.
    pub fn with_unresolved_store(mut self, store: Arc<dyn UnresolvedStore>) -> Self {
        self.parked_store = store;
        self
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    // -- admission ----------------------------------------------------------

    /// Apply `event`, waiting for an in-flight slot.
    pub async fn apply(&self, event: &InboundEvent) -> Result<ApplyOutcome, SyncError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::internal("reconcile engine closed"))?;
        self.apply_admitted(event).await
    }

    /// Apply `event` only if a slot is free right now.
    ///
    /// # Errors
    /// `Backpressure` when `max_in_flight` applications are running.
    pub async fn try_apply(&self, event: &InboundEvent) -> Result<ApplyOutcome, SyncError> {
        let _permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(TryAcquireError::NoPermits) => {
                return Err(SyncError::backpressure()
                    .with_marketplace(event.marketplace)
                    .with_entity(event.external_id.clone()));
            }
            Err(TryAcquireError::Closed) => {
                return Err(SyncError::internal("reconcile engine closed"));
            }
        };
        self.apply_admitted(event).await
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight
            .saturating_sub(self.permits.available_permits())
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    async fn apply_admitted(&self, event: &InboundEvent) -> Result<ApplyOutcome, SyncError> {
        let key = event.key();
        let result = match event.event_type {
            EventType::OrderCreated => self.apply_order_created(event, &key).await,
            EventType::StockUpdated => self.apply_stock_updated(event, &key).await,
        };
        match &result {
            Ok(outcome) => tracing::info!(
                marketplace = %event.marketplace,
                event_type = %event.event_type,
                external_id = %event.external_id,
                outcome = outcome.as_str(),
                "event reconciled"
            ),
            Err(e) => tracing::warn!(
                marketplace = %event.marketplace,
                event_type = %event.event_type,
                external_id = %event.external_id,
                error = %e,
                "event not applied"
            ),
        }
        result.map_err(|e| {
            let e = e.with_marketplace(event.marketplace);
            if e.context.entity_id.is_none() {
                e.with_entity(event.external_id.clone())
            } else {
                e
            }
        })
    }

    // -- ledger -------------------------------------------------------------

    async fn is_processed(&self, key: &EventKey) -> Result<bool, SyncError> {
        self.ledger
            .is_processed(key)
            .await
            .map_err(|e| collaborator("event ledger", e))
    }

    async fn mark_processed(&self, key: &EventKey) -> Result<(), SyncError> {
        self.ledger
            .mark_processed(key, Utc::now())
            .await
            .map(|_| ())
            .map_err(|e| collaborator("event ledger", e))
    }

    // -- order.created ------------------------------------------------------

    async fn apply_order_created(
        &self,
        event: &InboundEvent,
        key: &EventKey,
    ) -> Result<ApplyOutcome, SyncError> {
        let order = payload::parse_order(&event.payload, event.occurred_at)?;
        let m = event.marketplace;
        let _entity = self
            .locks
            .lock(&format!("order:{m}:{}", order.external_id))
            .await;

        if self.is_processed(key).await? {
            return Ok(ApplyOutcome::Duplicate);
        }
        let order_key = EventKey {
            marketplace: m,
            external_id: order.external_id.clone(),
            event_type: EventType::OrderCreated,
        };
        let state = guard(&self.orders)
            .get(&(m, order.external_id.clone()))
            .map(|o| o.state);
        let imported = match state {
            Some(s) => s != OrderState::Pending,
            None => order_key != *key && self.is_processed(&order_key).await?,
        };
        if imported {
            self.mark_processed(key).await?;
            return Ok(ApplyOutcome::AlreadyImported);
        }

        let ctx = ImportContext {
            marketplace: m,
            account_id: self.accounts.get(&m).cloned().unwrap_or_default(),
            received_at: event.received_at,
        };
        let local_id = self
            .catalog
            .create_order(&ctx, &order)
            .await
            .map_err(|e| collaborator("catalog create_order", e).with_entity(order.external_id.clone()))?;
        tracing::info!(marketplace = %m, order_id = %order.external_id, local_id = %local_id, "order imported");

        {
            let mut orders = guard(&self.orders);
            let record = orders
                .entry((m, order.external_id.clone()))
                .or_insert_with(|| OrderRecord::new(m, order.external_id.clone()));
            record
                .apply(&OrderEvent::Import { local_id }, Some(&key.to_string()))
                .map_err(|e| SyncError::internal(e.to_string()))?;
        }
        self.mark_processed(key).await?;
        if order_key != *key {
            self.mark_processed(&order_key).await?;
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Feed pulled orders through the same path as `order.created` webhooks.
    /// Stops at the first failure.
    pub async fn import_orders(&self, m: MarketplaceId, orders: &[RemoteOrder]) -> ImportReport {
        let mut report = ImportReport::default();
        let received_at = Utc::now();
        for order in orders {
            let payload = match serde_json::to_value(order) {
                Ok(v) => v,
                Err(e) => {
                    report.failure = Some(
                        SyncError::internal(format!("order not serializable: {e}"))
                            .with_marketplace(m)
                            .with_entity(order.external_id.clone()),
                    );
                    break;
                }
            };
            let event = InboundEvent {
                marketplace: m,
                event_type: EventType::OrderCreated,
                external_id: order.external_id.clone(),
                payload,
                occurred_at: order.created_at,
                received_at,
                processed_at: None,
                synthetic_id: false,
            };
            match self.apply(&event).await {
                Ok(ApplyOutcome::Applied) => report.imported += 1,
                Ok(_) => report.duplicates += 1,
                Err(e) => {
                    report.failure = Some(e);
                    break;
                }
            }
        }
        report
    }

    // -- stock.updated ------------------------------------------------------

    async fn apply_stock_updated(
        &self,
        event: &InboundEvent,
        key: &EventKey,
    ) -> Result<ApplyOutcome, SyncError> {
        let data = payload::parse_stock(&event.payload)?;
        let m = event.marketplace;
        let keyed = !event.synthetic_id;

        if keyed && self.is_processed(key).await? {
            return Ok(ApplyOutcome::Duplicate);
        }
        let local = self
            .links
            .local_sku(m, &data.sku)
            .await
            .map_err(|e| collaborator("product links", e).with_entity(data.sku.clone()))?;
        let Some(local_sku) = local else {
            self.park(event.clone(), format!("no product link for {m} sku {}", data.sku))
                .await?;
            return Ok(ApplyOutcome::Parked);
        };

        let _entity = self.locks.lock(&format!("stock:{local_sku}")).await;
        if keyed && self.is_processed(key).await? {
            return Ok(ApplyOutcome::Duplicate);
        }
        if !keyed && self.holds_marketplace_qty(&local_sku, data.qty) {
            self.unpark(key).await;
            return Ok(ApplyOutcome::Duplicate);
        }
        let decision = guard(&self.stock)
            .get(&local_sku)
            .map(|r| r.check(event.occurred_at))
            .unwrap_or(StockDecision::Accept);
        if let StockDecision::Stale { last_at, got_at } = decision {
            tracing::info!(
                marketplace = %m,
                sku = %local_sku,
                last_at = %last_at,
                got_at = %got_at,
                "stale stock update ignored"
            );
            if keyed {
                self.mark_processed(key).await?;
            }
            return Ok(ApplyOutcome::Stale);
        }

        self.catalog
            .update_product_stock(&local_sku, data.qty)
            .await
            .map_err(|e| collaborator("catalog update_product_stock", e).with_entity(local_sku.clone()))?;
        guard(&self.stock)
            .entry(local_sku.clone())
            .or_default()
            .commit(StockWrite {
                qty: data.qty,
                at: event.occurred_at,
                source: StockSource::Marketplace,
            });
        self.unpark(key).await;
        if keyed {
            self.mark_processed(key).await?;
        }
        Ok(ApplyOutcome::Applied)
    }

    fn holds_marketplace_qty(&self, sku: &str, qty: i64) -> bool {
        guard(&self.stock)
            .get(sku)
            .and_then(|r| r.last())
            .is_some_and(|w| w.source == StockSource::Marketplace && w.qty == qty)
    }

    /// A stock change made locally, entered into the same last-writer-wins
    /// register as marketplace updates.
    pub async fn record_local_stock(&self, sku: &str, qty: i64, at: DateTime<Utc>) -> StockDecision {
        let _entity = self.locks.lock(&format!("stock:{sku}")).await;
        let decision = guard(&self.stock)
            .entry(sku.to_string())
            .or_default()
            .commit(StockWrite {
                qty,
                at,
                source: StockSource::Local,
            });
        tracing::debug!(sku, qty, accepted = decision.is_accept(), "local stock recorded");
        decision
    }

    pub fn stock_of(&self, sku: &str) -> Option<StockWrite> {
        guard(&self.stock).get(sku).and_then(|r| r.last().cloned())
    }

    // -- unresolved ---------------------------------------------------------

    async fn park(&self, event: InboundEvent, reason: String) -> Result<(), SyncError> {
        let parked = ParkedEvent {
            event,
            reason,
            parked_at: Utc::now(),
        };
        self.parked_store
            .park(&parked)
            .await
            .map_err(|e| collaborator("unresolved store", e))?;
        tracing::warn!(
            marketplace = %parked.event.marketplace,
            external_id = %parked.event.external_id,
            reason = %parked.reason,
            "event parked for retry"
        );
        guard(&self.unresolved).insert(parked.event.key(), parked);
        Ok(())
    }

    /// Park an event whose application failed with a retryable error, so the
    /// next [`Self::retry_unresolved`] picks it up.
    pub async fn park_failed(&self, event: InboundEvent, error: &SyncError) -> Result<(), SyncError> {
        self.park(event, format!("apply failed: {error}")).await
    }

    async fn unpark(&self, key: &EventKey) {
        if guard(&self.unresolved).remove(key).is_none() {
            return;
        }
        self.forget_parked(key).await;
    }

    async fn forget_parked(&self, key: &EventKey) {
        if let Err(e) = self.parked_store.remove(key).await {
            // Left behind in the store; its next retry resolves as a duplicate.
            let error = format!("{e:#}");
            tracing::warn!(key = %key, error = %error, "unresolved store remove failed");
        }
    }

    /// Load parked events persisted by an earlier process.
    pub async fn restore_unresolved(&self) -> anyhow::Result<usize> {
        let stored = self.parked_store.load().await?;
        let mut map = guard(&self.unresolved);
        for p in stored {
            map.insert(p.event.key(), p);
        }
        tracing::info!(parked = map.len(), "unresolved events restored");
        Ok(map.len())
    }

    pub fn unresolved_count(&self) -> usize {
        guard(&self.unresolved).len()
    }

    /// Parked events with the reason each was parked.
    pub fn unresolved(&self) -> Vec<(InboundEvent, String)> {
        guard(&self.unresolved)
            .values()
            .map(|p| (p.event.clone(), p.reason.clone()))
            .collect()
    }

    /// Re-apply every parked event, oldest first. Events that still lack a
    /// link, or fail, stay parked.
    pub async fn retry_unresolved(&self) -> RetryReport {
        self.retry_parked(|_| true).await
    }

    /// [`Self::retry_unresolved`] restricted to events from `m`.
    pub async fn retry_unresolved_for(&self, m: MarketplaceId) -> RetryReport {
        self.retry_parked(|key| key.marketplace == m).await
    }

    async fn retry_parked(&self, select: impl Fn(&EventKey) -> bool) -> RetryReport {
        let mut parked: Vec<ParkedEvent> = {
            let mut map = guard(&self.unresolved);
            let keys: Vec<EventKey> = map.keys().filter(|k| select(k)).cloned().collect();
            keys.iter().filter_map(|k| map.remove(k)).collect()
        };
        parked.sort_by_key(|p| p.parked_at);
        let mut report = RetryReport::default();
        for p in parked {
            let key = p.event.key();
            match self.apply(&p.event).await {
                Ok(ApplyOutcome::Parked) => report.still_parked += 1,
                Ok(_) => {
                    report.applied += 1;
                    self.forget_parked(&key).await;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        marketplace = %p.event.marketplace,
                        external_id = %p.event.external_id,
                        error = %e,
                        "parked event failed on retry"
                    );
                    guard(&self.unresolved).insert(key, p);
                }
            }
        }
        tracing::info!(
            applied = report.applied,
            still_parked = report.still_parked,
            failed = report.failed,
            "unresolved events retried"
        );
        report
    }

    // -- order lifecycle ----------------------------------------------------

    async fn transition(
        &self,
        m: MarketplaceId,
        external_id: &str,
        event: OrderEvent,
        event_id: Option<&str>,
    ) -> Result<OrderState, SyncError> {
        let _entity = self.locks.lock(&format!("order:{m}:{external_id}")).await;
        let id = (m, external_id.to_string());
        let mut orders = guard(&self.orders);
        let record = orders.get_mut(&id).ok_or_else(|| {
            SyncError::permanent("unknown order")
                .with_marketplace(m)
                .with_entity(external_id)
        })?;
        record.apply(&event, event_id).map_err(|e| {
            SyncError::permanent(e.to_string())
                .with_marketplace(m)
                .with_entity(external_id)
        })?;
        let state = record.state;
        tracing::info!(marketplace = %m, order_id = external_id, state = %state, "order transitioned");
        if state.is_terminal() {
            orders.remove(&id);
        }
        Ok(state)
    }

    pub async fn acknowledge(
        &self,
        m: MarketplaceId,
        external_id: &str,
        event_id: Option<&str>,
    ) -> Result<OrderState, SyncError> {
        self.transition(m, external_id, OrderEvent::Acknowledge, event_id).await
    }

    pub async fn mark_shipped(
        &self,
        m: MarketplaceId,
        external_id: &str,
        event_id: Option<&str>,
    ) -> Result<OrderState, SyncError> {
        self.transition(m, external_id, OrderEvent::Ship, event_id).await
    }

    pub async fn mark_cancelled(
        &self,
        m: MarketplaceId,
        external_id: &str,
        event_id: Option<&str>,
    ) -> Result<OrderState, SyncError> {
        self.transition(m, external_id, OrderEvent::Cancel, event_id).await
    }

    pub async fn complete(
        &self,
        m: MarketplaceId,
        external_id: &str,
        event_id: Option<&str>,
    ) -> Result<OrderState, SyncError> {
        self.transition(m, external_id, OrderEvent::Complete, event_id).await
    }

    pub fn order_state(&self, m: MarketplaceId, external_id: &str) -> Option<OrderState> {
        guard(&self.orders)
            .get(&(m, external_id.to_string()))
            .map(|o| o.state)
    }

    pub fn order(&self, m: MarketplaceId, external_id: &str) -> Option<OrderRecord> {
        guard(&self.orders).get(&(m, external_id.to_string())).cloned()
    }

    /// Imported orders of `m` not yet acknowledged toward the marketplace.
    pub fn pending_acknowledgements(&self, m: MarketplaceId) -> Vec<String> {
        let mut ids: Vec<String> = guard(&self.orders)
            .values()
            .filter(|o| o.marketplace == m && o.state == OrderState::Imported)
            .map(|o| o.external_id.clone())
            .collect();
        ids.sort();
        ids
    }

    // -- client results -----------------------------------------------------

    pub fn record_result(&self, result: &SyncResult) {
        let mut tallies = guard(&self.results);
        let t = tallies
            .entry((result.marketplace, result.operation))
            .or_insert_with(|| ResultTally {
                marketplace: result.marketplace,
                operation: result.operation,
                succeeded: 0,
                failed: 0,
                last_error: None,
                last_finished_at: result.finished_at,
            });
        if result.succeeded {
            t.succeeded += 1;
        } else {
            t.failed += 1;
            t.last_error = result.error_kind;
        }
        t.last_finished_at = result.finished_at;
    }

    pub fn result_tallies(&self) -> Vec<ResultTally> {
        guard(&self.results).values().cloned().collect()
    }
}
