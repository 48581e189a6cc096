//! Shared runtime state for mps-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The orchestrator and
//! the webhook ingestor are built once here and shared by every route.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use mps_client::{ClientRegistry, CredentialStore, MarketplaceAdapter, RateLimitStats, ResultSink};
use mps_config::secrets::ResolvedSecrets;
use mps_config::SyncSettings;
use mps_ingest::{IngestStats, OverflowQueue, OverflowWorker, WebhookIngestor};
use mps_reconcile::{
    Catalog, EventLedger, ProductLinks, ReconcileEngine, ResultTally, UnresolvedStore,
};
use mps_runtime::{PassReport, SyncOrchestrator, WatermarkStore};
use mps_schemas::{MarketplaceId, SyncResult};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
    SyncResult(SyncResult),
    PassReport(PassReport),
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the engine, returned by GET /v1/status and carried
/// inside SSE `status` events.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// "idle" | "running"
    pub state: String,
    pub config_hash: String,
    pub marketplaces: Vec<MarketplaceId>,
    pub watermarks: BTreeMap<MarketplaceId, DateTime<Utc>>,
    pub last_passes: Vec<PassReport>,
    pub unresolved_events: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub rate_limits: Vec<RateLimitStats>,
    pub ingest: IngestStats,
    pub results: Vec<ResultTally>,
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Storage the engine runs against: REST catalog plus Postgres in
/// production, in-memory fakes in tests.
#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn Catalog>,
    pub links: Arc<dyn ProductLinks>,
    pub ledger: Arc<dyn EventLedger>,
    pub unresolved: Arc<dyn UnresolvedStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
}

/// Forwards every client result onto the bus and into the engine tallies.
struct BusSink {
    bus: broadcast::Sender<BusMsg>,
    engine: Arc<ReconcileEngine>,
}

impl ResultSink for BusSink {
    fn record(&self, result: &SyncResult) {
        self.engine.record_result(result);
        let _ = self.bus.send(BusMsg::SyncResult(result.clone()));
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub config_hash: String,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub ingestor: Arc<WebhookIngestor>,
}

impl AppState {
    /// Wire engine, clients, orchestrator and ingestor. `adapters = None`
    /// builds the real adapter for every enabled marketplace.
    ///
    /// The returned worker drains the webhook overflow queue and must be
    /// spawned by the caller.
    pub fn assemble(
        config_hash: impl Into<String>,
        settings: SyncSettings,
        secrets: &ResolvedSecrets,
        backends: Backends,
        adapters: Option<Vec<Arc<dyn MarketplaceAdapter>>>,
    ) -> Result<(Self, OverflowWorker)> {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let mut engine = ReconcileEngine::from_settings(
            backends.catalog,
            backends.links,
            backends.ledger,
            &settings.engine,
        )
        .with_unresolved_store(backends.unresolved);
        for (m, ms) in &settings.marketplaces {
            engine = engine.with_account(*m, ms.account_id.clone());
        }
        let engine = Arc::new(engine);

        let sink: Arc<dyn ResultSink> = Arc::new(BusSink {
            bus: bus.clone(),
            engine: Arc::clone(&engine),
        });
        let registry = match adapters {
            Some(adapters) => ClientRegistry::with_adapters(
                &settings,
                Arc::new(CredentialStore::from_secrets(&settings, secrets)),
                adapters,
                sink,
            )?,
            None => ClientRegistry::from_settings(&settings, secrets, sink)?,
        };

        let (queue, worker) = OverflowQueue::bounded(settings.engine.overflow_queue_depth);
        let ingestor = WebhookIngestor::new(Arc::clone(&engine), queue).with_secrets(secrets);

        let orchestrator = SyncOrchestrator::new(
            Arc::new(registry),
            engine,
            backends.watermarks,
            settings,
        );

        Ok((
            Self {
                bus,
                build: BuildInfo {
                    service: "mps-daemon",
                    version: env!("CARGO_PKG_VERSION"),
                },
                config_hash: config_hash.into(),
                orchestrator: Arc::new(orchestrator),
                ingestor: Arc::new(ingestor),
            },
            worker,
        ))
    }

    pub fn engine(&self) -> &Arc<ReconcileEngine> {
        self.orchestrator.engine()
    }

    pub async fn snapshot(&self) -> Result<StatusSnapshot> {
        let engine = self.engine();
        let watermarks = self.orchestrator.watermarks().all().await?;
        Ok(StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            state: if self.orchestrator.is_running() { "running" } else { "idle" }.to_string(),
            config_hash: self.config_hash.clone(),
            marketplaces: self.orchestrator.registry().marketplaces(),
            watermarks,
            last_passes: self.orchestrator.last_reports(),
            unresolved_events: engine.unresolved_count(),
            in_flight: engine.in_flight(),
            max_in_flight: engine.max_in_flight(),
            rate_limits: self.orchestrator.registry().limiter().all_stats(),
            ingest: self.ingestor.stats(),
            results: engine.result_tallies(),
        })
    }

    pub fn log(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Relay finished pass reports from the orchestrator onto the bus.
pub fn spawn_report_forwarder(state: Arc<AppState>) {
    let mut rx = state.orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(report) => {
                    let _ = state.bus.send(BusMsg::PassReport(report));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "pass report forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
