//! Sync orchestrator: periodic or triggered passes over every active
//! marketplace.
//!
//! # Pass contract
//!
//! For each marketplace, in order:
//! 1. `list_orders(since = watermark)` and feed the orders to the
//!    [`ReconcileEngine`]; a failed import is fatal for this marketplace.
//! 2. Acknowledge newly imported orders (failures are reported, not fatal).
//! 3. Push dirty products the marketplace lists, after `list_products`;
//!    unknown skus stay dirty. Push failures leave the product dirty.
//! 4. Retry the marketplace's parked events; those still unresolved stay
//!    parked and do not fail the pass.
//! 5. Advance the watermark to the pass start time.
//!
//! Marketplaces run in parallel and never abort each other. A cancel
//! request is observed between calls; a cancelled or failed marketplace
//! keeps its watermark.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use mps_client::{ClientRegistry, MarketplaceClient};
use mps_config::{MarketplaceSettings, SyncSettings};
use mps_reconcile::{MarketplaceProduct, ReconcileEngine};
use mps_schemas::{MarketplaceId, SyncError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::dirty::DirtySet;
use crate::pricing::{outbound_price, outbound_qty};
use crate::report::PassReport;
use crate::watermark::WatermarkStore;

enum Flow {
    Done,
    Cancelled,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct SyncOrchestrator {
    registry: Arc<ClientRegistry>,
    engine: Arc<ReconcileEngine>,
    watermarks: Arc<dyn WatermarkStore>,
    settings: SyncSettings,
    dirty: Mutex<DirtySet>,
    reports: Mutex<BTreeMap<MarketplaceId, PassReport>>,
    cancel: watch::Sender<bool>,
    running: tokio::sync::Mutex<()>,
    reports_tx: broadcast::Sender<PassReport>,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        engine: Arc<ReconcileEngine>,
        watermarks: Arc<dyn WatermarkStore>,
        settings: SyncSettings,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        let (reports_tx, _) = broadcast::channel(64);
        Self {
            registry,
            engine,
            watermarks,
            settings,
            dirty: Mutex::new(DirtySet::new()),
            reports: Mutex::new(BTreeMap::new()),
            cancel,
            running: tokio::sync::Mutex::new(()),
            reports_tx,
        }
    }

    pub fn engine(&self) -> &Arc<ReconcileEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn watermarks(&self) -> &Arc<dyn WatermarkStore> {
        &self.watermarks
    }

    /// Every finished [`PassReport`], as it is produced.
    pub fn subscribe(&self) -> broadcast::Receiver<PassReport> {
        self.reports_tx.subscribe()
    }

    pub fn last_reports(&self) -> Vec<PassReport> {
        guard(&self.reports).values().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Ask the running pass to stop at its next suspension point. Returns
    /// whether a pass was running.
    pub fn cancel(&self) -> bool {
        let running = self.is_running();
        if running {
            self.cancel.send_replace(true);
            tracing::info!("sync pass cancel requested");
        }
        running
    }

    pub fn mark_dirty(&self, m: MarketplaceId, sku: impl Into<String>) {
        guard(&self.dirty).mark(m, sku);
    }

    pub fn dirty_skus(&self, m: MarketplaceId) -> Vec<String> {
        guard(&self.dirty).pending(m)
    }

    /// Marketplaces whose `sync_interval_secs` elapsed since their last pass.
    pub fn due_marketplaces(&self, now: DateTime<Utc>) -> Vec<MarketplaceId> {
        let reports = guard(&self.reports);
        self.registry
            .marketplaces()
            .into_iter()
            .filter(|m| {
                let interval = self
                    .settings
                    .marketplace(*m)
                    .map(|s| s.sync_interval_secs)
                    .unwrap_or_else(|| MarketplaceSettings::default().sync_interval_secs);
                match reports.get(m) {
                    None => true,
                    Some(r) => {
                        let elapsed = now.signed_duration_since(r.finished_at);
                        elapsed.num_seconds() >= interval as i64
                    }
                }
            })
            .collect()
    }

    /// Run one pass over `only`, or over every active marketplace.
    pub async fn run_pass(&self, only: Option<MarketplaceId>) -> Vec<PassReport> {
        let targets = match only {
            Some(m) => vec![m],
            None => self.registry.marketplaces(),
        };
        self.run_selected(targets).await
    }

    async fn run_selected(&self, targets: Vec<MarketplaceId>) -> Vec<PassReport> {
        let _run = self.running.lock().await;
        self.cancel.send_replace(false);
        let cancel = self.cancel.subscribe();

        let runs = targets.into_iter().filter_map(|m| match self.registry.get(m) {
            Some(client) => Some(self.run_marketplace(client, cancel.clone())),
            None => {
                tracing::warn!(marketplace = %m, "no active client; skipped");
                None
            }
        });
        let reports = join_all(runs).await;

        {
            let mut stored = guard(&self.reports);
            for r in &reports {
                stored.insert(r.marketplace, r.clone());
            }
        }
        for r in &reports {
            let _ = self.reports_tx.send(r.clone());
        }
        reports
    }

    /// Run due marketplaces every `tick` until the handle is aborted.
    pub fn spawn_scheduler(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                let due = self.due_marketplaces(Utc::now());
                if due.is_empty() || self.is_running() {
                    continue;
                }
                self.run_selected(due).await;
            }
        })
    }

    // -- one marketplace ----------------------------------------------------

    async fn run_marketplace(
        &self,
        client: Arc<MarketplaceClient>,
        cancel: watch::Receiver<bool>,
    ) -> PassReport {
        let m = client.marketplace();
        let mut report = PassReport::start(m, Utc::now());
        tracing::info!(marketplace = %m, "sync pass started");

        let report = match self.sync_marketplace(&client, &cancel, &mut report).await {
            Ok(Flow::Done) => match self.watermarks.advance(m, report.started_at).await {
                Ok(at) => {
                    report.watermark = Some(at);
                    report.finished_at = Utc::now();
                    report
                }
                Err(e) => report.fail(&SyncError::internal(format!("watermark store: {e:#}"))),
            },
            Ok(Flow::Cancelled) => report.cancel(),
            Err(e) => report.fail(&e.with_marketplace(m)),
        };

        match &report.error {
            None => tracing::info!(
                marketplace = %m,
                status = ?report.status,
                imported = report.orders_imported,
                pushed = report.pushed,
                unresolved_applied = report.unresolved_applied,
                "sync pass finished"
            ),
            Some(err) => tracing::warn!(
                marketplace = %m,
                status = ?report.status,
                imported = report.orders_imported,
                error = %err,
                "sync pass failed; watermark kept"
            ),
        }
        report
    }

    async fn sync_marketplace(
        &self,
        client: &MarketplaceClient,
        cancel: &watch::Receiver<bool>,
        report: &mut PassReport,
    ) -> Result<Flow, SyncError> {
        let m = client.marketplace();
        let cancelled = || *cancel.borrow();

        report.since = self
            .watermarks
            .load(m)
            .await
            .map_err(|e| SyncError::internal(format!("watermark store: {e:#}")))?;
        if cancelled() {
            return Ok(Flow::Cancelled);
        }

        let orders = client.list_orders(report.since.unwrap_or_default()).await?;
        report.orders_fetched = orders.len() as u32;
        if cancelled() {
            return Ok(Flow::Cancelled);
        }

        let import = self.engine.import_orders(m, &orders).await;
        report.orders_imported = import.imported;
        report.orders_duplicate = import.duplicates;
        if let Some(e) = import.failure {
            return Err(e);
        }

        for order_id in self.engine.pending_acknowledgements(m) {
            if cancelled() {
                return Ok(Flow::Cancelled);
            }
            match client.acknowledge_order(&order_id).await {
                Ok(()) => match self.engine.acknowledge(m, &order_id, None).await {
                    Ok(_) => report.orders_acknowledged += 1,
                    Err(e) => tracing::warn!(marketplace = %m, order_id = %order_id, error = %e, "ack not recorded"),
                },
                Err(e) => {
                    tracing::warn!(marketplace = %m, order_id = %order_id, error = %e, "acknowledge failed")
                }
            }
        }
        if cancelled() {
            return Ok(Flow::Cancelled);
        }

        if let Flow::Cancelled = self.push_dirty(client, cancel, report).await? {
            return Ok(Flow::Cancelled);
        }
        if cancelled() {
            return Ok(Flow::Cancelled);
        }

        let retry = self.engine.retry_unresolved_for(m).await;
        report.unresolved_applied = retry.applied;
        report.unresolved_remaining = retry.still_parked + retry.failed;
        Ok(Flow::Done)
    }

    async fn push_dirty(
        &self,
        client: &MarketplaceClient,
        cancel: &watch::Receiver<bool>,
        report: &mut PassReport,
    ) -> Result<Flow, SyncError> {
        let m = client.marketplace();
        let ms = self.settings.marketplace(m).cloned().unwrap_or_default();

        let products = self
            .engine
            .catalog()
            .get_marketplace_products(m)
            .await
            .map_err(|e| SyncError::internal(format!("catalog get_marketplace_products: {e:#}")))?;
        let pending = {
            let mut dirty = guard(&self.dirty);
            for p in products.iter().filter(|p| p.dirty) {
                dirty.mark_if_changed(m, &p.link.local_sku, p.qty, p.price);
            }
            dirty.pending(m)
        };
        if pending.is_empty() {
            return Ok(Flow::Done);
        }
        if *cancel.borrow() {
            return Ok(Flow::Cancelled);
        }

        let listed: HashSet<String> = client
            .list_products()
            .await?
            .into_iter()
            .map(|p| p.sku)
            .collect();
        let by_local: HashMap<&str, &MarketplaceProduct> = products
            .iter()
            .map(|p| (p.link.local_sku.as_str(), p))
            .collect();

        for sku in pending {
            let Some(product) = by_local.get(sku.as_str()) else {
                report.unknown_skus.push(sku);
                continue;
            };
            if !listed.contains(&product.link.remote_sku) {
                tracing::warn!(marketplace = %m, sku = %sku, "not listed on marketplace; push skipped");
                report.unknown_skus.push(sku);
                continue;
            }
            if *cancel.borrow() {
                return Ok(Flow::Cancelled);
            }

            let qty = outbound_qty(product.qty, ms.stock_buffer);
            let price = outbound_price(product.price, ms.price_margin);
            match client
                .push_inventory(&product.link.remote_sku, qty, price)
                .await
            {
                Ok(()) => {
                    guard(&self.dirty).clear_pushed(m, &sku, product.qty, product.price);
                    report.pushed += 1;
                }
                Err(e) => {
                    tracing::warn!(marketplace = %m, sku = %sku, error = %e, "push failed; stays dirty");
                    report.push_failed += 1;
                }
            }
        }
        Ok(Flow::Done)
    }
}
