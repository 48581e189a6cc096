use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mps_client::{AuthContext, CallError, ClientRegistry, CredentialStore, MarketplaceAdapter, NullSink};
use mps_config::load_layered_yaml_from_strings;
use mps_reconcile::{
    Catalog, ImportContext, InMemoryCatalog, InMemoryLedger, InMemoryProductLinks,
    MarketplaceProduct, ReconcileEngine,
};
use mps_runtime::*;
use mps_schemas::{
    Credential, InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct,
};

/// Always lists the same five orders and records every `since` it is asked for.
struct FiveOrders {
    sinces: Mutex<Vec<DateTime<Utc>>>,
    acked: Mutex<Vec<String>>,
}

fn order(n: u32) -> RemoteOrder {
    RemoteOrder {
        external_id: format!("O-{n}"),
        order_number: format!("{n}"),
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, n, 0).unwrap(),
        customer_name: "Elif".into(),
        total: 25.0,
        currency: "TRY".into(),
        lines: vec![OrderLine {
            sku: "ABC123".into(),
            qty: 1,
            unit_price: 25.0,
        }],
    }
}

#[async_trait]
impl MarketplaceAdapter for FiveOrders {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Trendyol
    }

    async fn list_products(&self, _auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        Ok(Vec::new())
    }

    async fn push_inventory(&self, _auth: &AuthContext, _u: &InventoryUpdate) -> Result<(), CallError> {
        Ok(())
    }

    async fn list_orders(
        &self,
        _auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        self.sinces.lock().unwrap().push(since);
        Ok((1..=5).map(order).collect())
    }

    async fn acknowledge_order(&self, _auth: &AuthContext, id: &str) -> Result<(), CallError> {
        self.acked.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Refuses order O-4 once, then behaves.
struct FlakyCatalog {
    inner: InMemoryCatalog,
    tripped: AtomicBool,
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn create_order(&self, ctx: &ImportContext, order: &RemoteOrder) -> Result<String> {
        if order.external_id == "O-4" && !self.tripped.swap(true, Ordering::SeqCst) {
            bail!("catalog unavailable");
        }
        self.inner.create_order(ctx, order).await
    }

    async fn update_product_stock(&self, sku: &str, qty: i64) -> Result<()> {
        self.inner.update_product_stock(sku, qty).await
    }

    async fn get_marketplace_products(&self, m: MarketplaceId) -> Result<Vec<MarketplaceProduct>> {
        self.inner.get_marketplace_products(m).await
    }
}

#[tokio::test]
async fn failed_pass_keeps_watermark_and_next_pass_imports_the_rest() {
    let settings = load_layered_yaml_from_strings(&[r#"
marketplaces:
  trendyol:
    enabled: true
    account_id: "1001"
"#])
    .unwrap()
    .settings()
    .unwrap();

    let adapter = Arc::new(FiveOrders {
        sinces: Mutex::new(Vec::new()),
        acked: Mutex::new(Vec::new()),
    });
    let credentials = Arc::new(CredentialStore::default());
    credentials.insert(Credential::new(MarketplaceId::Trendyol, "1001", "key", "secret"));
    let registry = ClientRegistry::with_adapters(
        &settings,
        credentials,
        vec![adapter.clone() as Arc<dyn MarketplaceAdapter>],
        Arc::new(NullSink),
    )
    .unwrap();

    let catalog = Arc::new(FlakyCatalog {
        inner: InMemoryCatalog::new(),
        tripped: AtomicBool::new(false),
    });
    let engine = Arc::new(ReconcileEngine::new(
        catalog.clone(),
        Arc::new(InMemoryProductLinks::new()),
        Arc::new(InMemoryLedger::new()),
        8,
    ));
    let watermarks = Arc::new(InMemoryWatermarkStore::new());
    let orch = SyncOrchestrator::new(Arc::new(registry), engine.clone(), watermarks.clone(), settings);

    // Pass 1: three orders land, the fourth fails.
    let first = orch.run_pass(None).await;
    assert_eq!(first.len(), 1);
    let r1 = &first[0];
    assert_eq!(r1.status, PassStatus::Failed);
    assert_eq!(r1.orders_fetched, 5);
    assert_eq!(r1.orders_imported, 3);
    assert_eq!(r1.watermark, None);
    assert_eq!(watermarks.load(MarketplaceId::Trendyol).await.unwrap(), None);
    assert_eq!(catalog.inner.orders().await.len(), 3);
    assert!(adapter.acked.lock().unwrap().is_empty());

    // Pass 2: same `since`, all five fetched again, only two applied.
    let second = orch.run_pass(Some(MarketplaceId::Trendyol)).await;
    let r2 = &second[0];
    assert_eq!(r2.status, PassStatus::Completed);
    assert_eq!(r2.orders_fetched, 5);
    assert_eq!(r2.orders_imported, 2);
    assert_eq!(r2.orders_duplicate, 3);
    assert_eq!(r2.orders_acknowledged, 5);
    assert_eq!(r2.watermark, Some(r2.started_at));
    assert_eq!(catalog.inner.orders().await.len(), 5);

    let sinces = adapter.sinces.lock().unwrap().clone();
    assert_eq!(sinces.len(), 2);
    assert_eq!(sinces[0], sinces[1]);

    // Pass 3 starts from pass 2's start time.
    orch.run_pass(None).await;
    let sinces = adapter.sinces.lock().unwrap().clone();
    assert_eq!(sinces[2], r2.started_at);
    assert!(sinces[2] > sinces[1] + Duration::days(1));
    assert_eq!(orch.last_reports().len(), 1);
}
