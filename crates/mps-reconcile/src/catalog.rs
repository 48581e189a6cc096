//! Contracts toward the catalog that owns orders and products.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::{MarketplaceId, ProductLink, RemoteOrder};
use serde::{Deserialize, Serialize};

/// Where an imported order came from. Passed explicitly to the catalog so
/// no call depends on an ambient "current marketplace".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportContext {
    pub marketplace: MarketplaceId,
    pub account_id: String,
    pub received_at: DateTime<Utc>,
}

/// A catalog product listed on one marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceProduct {
    pub link: ProductLink,
    pub qty: i64,
    pub price: f64,
    /// Changed locally since the last successful push.
    #[serde(default)]
    pub dirty: bool,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create the local order; returns its local id.
    async fn create_order(&self, ctx: &ImportContext, order: &RemoteOrder) -> Result<String>;

    async fn update_product_stock(&self, sku: &str, qty: i64) -> Result<()>;

    async fn get_marketplace_products(&self, marketplace: MarketplaceId) -> Result<Vec<MarketplaceProduct>>;
}

/// Marketplace sku to local sku.
#[async_trait]
pub trait ProductLinks: Send + Sync {
    async fn local_sku(&self, marketplace: MarketplaceId, remote_sku: &str) -> Result<Option<String>>;
}
