use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use mps_reconcile::{Catalog, ImportContext, InMemoryCatalog, MarketplaceProduct};
use mps_schemas::{MarketplaceId, RemoteOrder};
use tokio::sync::Mutex;

/// [`InMemoryCatalog`] that can be told to reject specific orders a number
/// of times.
pub struct FlakyCatalog {
    inner: Arc<InMemoryCatalog>,
    failures: Mutex<BTreeMap<String, u32>>,
}

impl FlakyCatalog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryCatalog::new()),
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryCatalog> {
        &self.inner
    }

    /// The next `create_order` for `external_id` fails; later ones succeed.
    pub async fn fail_order_once(&self, external_id: &str) {
        self.fail_order_times(external_id, 1).await;
    }

    /// The next `times` calls to `create_order` for `external_id` fail.
    pub async fn fail_order_times(&self, external_id: &str, times: u32) {
        self.failures.lock().await.insert(external_id.to_string(), times);
    }
}

impl Default for FlakyCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn create_order(&self, ctx: &ImportContext, order: &RemoteOrder) -> Result<String> {
        {
            let mut failures = self.failures.lock().await;
            if let Some(left) = failures.get_mut(&order.external_id) {
                *left -= 1;
                if *left == 0 {
                    failures.remove(&order.external_id);
                }
                bail!("catalog unavailable while creating {}", order.external_id);
            }
        }
        self.inner.create_order(ctx, order).await
    }

    async fn update_product_stock(&self, sku: &str, qty: i64) -> Result<()> {
        self.inner.update_product_stock(sku, qty).await
    }

    async fn get_marketplace_products(&self, marketplace: MarketplaceId) -> Result<Vec<MarketplaceProduct>> {
        self.inner.get_marketplace_products(marketplace).await
    }
}
