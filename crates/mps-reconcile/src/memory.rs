//! In-process collaborators for offline runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use mps_schemas::{MarketplaceId, ProductLink, RemoteOrder};
use tokio::sync::RwLock;

use crate::catalog::{Catalog, ImportContext, MarketplaceProduct, ProductLinks};

// ---------------------------------------------------------------------------
// ProductLinks
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryProductLinks {
    links: RwLock<HashMap<(MarketplaceId, String), String>>,
}

impl InMemoryProductLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link(&self, link: ProductLink) {
        self.links
            .write()
            .await
            .insert((link.marketplace, link.remote_sku), link.local_sku);
    }

    pub async fn unlink(&self, marketplace: MarketplaceId, remote_sku: &str) -> bool {
        self.links
            .write()
            .await
            .remove(&(marketplace, remote_sku.to_string()))
            .is_some()
    }

    /// Replace every link of `marketplace`.
    pub async fn replace_marketplace(&self, marketplace: MarketplaceId, links: Vec<ProductLink>) {
        let mut map = self.links.write().await;
        map.retain(|(m, _), _| *m != marketplace);
        for l in links {
            map.insert((marketplace, l.remote_sku), l.local_sku);
        }
    }
}

#[async_trait]
impl ProductLinks for InMemoryProductLinks {
    async fn local_sku(&self, marketplace: MarketplaceId, remote_sku: &str) -> Result<Option<String>> {
        Ok(self
            .links
            .read()
            .await
            .get(&(marketplace, remote_sku.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub local_id: String,
    pub ctx: ImportContext,
    pub order: RemoteOrder,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    next_id: AtomicU64,
    orders: RwLock<Vec<StoredOrder>>,
    stock: RwLock<BTreeMap<String, i64>>,
    listings: RwLock<BTreeMap<MarketplaceId, Vec<MarketplaceProduct>>>,
    stock_writes: AtomicU64,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_stock(&self, sku: &str, qty: i64) {
        self.stock.write().await.insert(sku.to_string(), qty);
    }

    pub async fn stock_of(&self, sku: &str) -> Option<i64> {
        self.stock.read().await.get(sku).copied()
    }

    /// Number of `update_product_stock` calls served.
    pub fn stock_writes(&self) -> u64 {
        self.stock_writes.load(Ordering::SeqCst)
    }

    pub async fn orders(&self) -> Vec<StoredOrder> {
        self.orders.read().await.clone()
    }

    pub async fn list_product(&self, marketplace: MarketplaceId, product: MarketplaceProduct) {
        self.listings
            .write()
            .await
            .entry(marketplace)
            .or_default()
            .push(product);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn create_order(&self, ctx: &ImportContext, order: &RemoteOrder) -> Result<String> {
        if order.lines.iter().any(|l| l.qty <= 0) {
            bail!("order {} has a line with non-positive qty", order.external_id);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let local_id = format!("L-{n}");
        self.orders.write().await.push(StoredOrder {
            local_id: local_id.clone(),
            ctx: ctx.clone(),
            order: order.clone(),
        });
        Ok(local_id)
    }

    async fn update_product_stock(&self, sku: &str, qty: i64) -> Result<()> {
        self.stock_writes.fetch_add(1, Ordering::SeqCst);
        self.stock.write().await.insert(sku.to_string(), qty);
        Ok(())
    }

    async fn get_marketplace_products(&self, marketplace: MarketplaceId) -> Result<Vec<MarketplaceProduct>> {
        Ok(self
            .listings
            .read()
            .await
            .get(&marketplace)
            .cloned()
            .unwrap_or_default())
    }
}
