use std::sync::Arc;

use anyhow::{Context, Result};
use mps_client::{ClientRegistry, CredentialStore, MarketplaceAdapter, RecordingSink};
use mps_config::{load_layered_yaml_from_strings, SyncSettings};
use mps_ingest::{OverflowQueue, WebhookIngestor};
use mps_mapping::{InMemoryMappingStore, MappingResolver};
use mps_reconcile::{InMemoryLedger, InMemoryProductLinks, InMemoryUnresolved, ReconcileEngine};
use mps_runtime::{InMemoryWatermarkStore, SyncOrchestrator};
use mps_schemas::{Credential, MarketplaceId};
use tokio::task::JoinHandle;

use crate::{FlakyCatalog, ScriptedAdapter};

/// The whole engine wired in-process, with handles on every fake.
///
/// Must be built inside a Tokio runtime: the overflow worker is spawned.
pub struct Harness {
    pub settings: SyncSettings,
    pub catalog: Arc<FlakyCatalog>,
    pub links: Arc<InMemoryProductLinks>,
    pub ledger: Arc<InMemoryLedger>,
    pub unresolved: Arc<InMemoryUnresolved>,
    pub watermarks: Arc<InMemoryWatermarkStore>,
    pub mappings: Arc<InMemoryMappingStore>,
    pub results: Arc<RecordingSink>,
    pub engine: Arc<ReconcileEngine>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub ingestor: Arc<WebhookIngestor>,
    /// The ingestor's overflow queue, for feeding the worker directly.
    pub overflow_queue: OverflowQueue,
    pub resolver: MappingResolver,
    overflow: JoinHandle<()>,
}

impl Harness {
    /// `yaml` is a single config layer. Every enabled marketplace gets a
    /// valid credential; `webhook_secrets` turns on signature checks.
    pub fn build(
        yaml: &str,
        adapters: Vec<Arc<ScriptedAdapter>>,
        webhook_secrets: &[(MarketplaceId, &str)],
    ) -> Result<Self> {
        let settings = load_layered_yaml_from_strings(&[yaml])?
            .settings()
            .context("harness config")?;

        let credentials = Arc::new(CredentialStore::default());
        for m in settings.enabled_marketplaces() {
            let account = settings
                .marketplace(m)
                .map(|ms| ms.account_id.clone())
                .unwrap_or_default();
            credentials.insert(Credential::new(m, account, "key", "secret"));
        }

        let results = Arc::new(RecordingSink::new());
        let registry = ClientRegistry::with_adapters(
            &settings,
            credentials,
            adapters
                .into_iter()
                .map(|a| a as Arc<dyn MarketplaceAdapter>)
                .collect(),
            results.clone(),
        )?;

        let catalog = Arc::new(FlakyCatalog::new());
        let links = Arc::new(InMemoryProductLinks::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let unresolved = Arc::new(InMemoryUnresolved::new());
        let mut engine = ReconcileEngine::from_settings(
            catalog.clone(),
            links.clone(),
            ledger.clone(),
            &settings.engine,
        )
        .with_unresolved_store(unresolved.clone());
        for (m, ms) in &settings.marketplaces {
            engine = engine.with_account(*m, ms.account_id.clone());
        }
        let engine = Arc::new(engine);

        let (queue, worker) = OverflowQueue::bounded(settings.engine.overflow_queue_depth);
        let overflow = worker.spawn(engine.clone());
        let mut ingestor = WebhookIngestor::new(engine.clone(), queue.clone());
        for (m, secret) in webhook_secrets {
            ingestor = ingestor.with_secret(*m, *secret);
        }

        let watermarks = Arc::new(InMemoryWatermarkStore::new());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(registry),
            engine.clone(),
            watermarks.clone(),
            settings.clone(),
        ));

        let mappings = Arc::new(InMemoryMappingStore::new());
        let resolver = MappingResolver::from_settings(mappings.clone(), &settings.mapping);

        Ok(Self {
            settings,
            catalog,
            links,
            ledger,
            unresolved,
            watermarks,
            mappings,
            results,
            engine,
            orchestrator,
            ingestor: Arc::new(ingestor),
            overflow_queue: queue,
            resolver,
            overflow,
        })
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.overflow.abort();
    }
}
