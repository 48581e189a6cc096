//! REST client for the catalog service that owns orders and products.
//!
//! - `POST {base}/orders` with `{ "context": ImportContext, "order": RemoteOrder }`
//!   → `{ "id": "<local id>" }`
//! - `PUT {base}/products/{sku}/stock` with `{ "qty": n }`
//! - `GET {base}/marketplace-products?marketplace=<id>` → `[MarketplaceProduct]`

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mps_config::CatalogSettings;
use mps_reconcile::{Catalog, ImportContext, MarketplaceProduct, ProductLinks};
use mps_schemas::{MarketplaceId, RemoteOrder};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct RestCatalog {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedOrder {
    id: serde_json::Value,
}

impl RestCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build catalog HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &CatalogSettings) -> Result<Self> {
        Self::new(settings.base_url.clone(), Duration::from_millis(settings.timeout_ms))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Catalog for RestCatalog {
    async fn create_order(&self, ctx: &ImportContext, order: &RemoteOrder) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/orders"))
            .json(&json!({ "context": ctx, "order": order }))
            .send()
            .await
            .context("catalog POST /orders failed")?
            .error_for_status()
            .context("catalog rejected order")?;
        let created: CreatedOrder = resp.json().await.context("catalog order response not JSON")?;
        match created.id {
            serde_json::Value::String(s) if !s.is_empty() => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(anyhow!("catalog returned unusable order id {other}")),
        }
    }

    async fn update_product_stock(&self, sku: &str, qty: i64) -> Result<()> {
        self.http
            .put(self.url(&format!("/products/{sku}/stock")))
            .json(&json!({ "qty": qty }))
            .send()
            .await
            .with_context(|| format!("catalog PUT stock failed for {sku}"))?
            .error_for_status()
            .with_context(|| format!("catalog rejected stock update for {sku}"))?;
        Ok(())
    }

    async fn get_marketplace_products(&self, marketplace: MarketplaceId) -> Result<Vec<MarketplaceProduct>> {
        self.http
            .get(self.url("/marketplace-products"))
            .query(&[("marketplace", marketplace.as_str())])
            .send()
            .await
            .context("catalog GET /marketplace-products failed")?
            .error_for_status()
            .context("catalog rejected product listing")?
            .json()
            .await
            .context("catalog product listing not JSON")
    }
}

#[async_trait]
impl ProductLinks for RestCatalog {
    async fn local_sku(&self, marketplace: MarketplaceId, remote_sku: &str) -> Result<Option<String>> {
        Ok(self
            .get_marketplace_products(marketplace)
            .await?
            .into_iter()
            .find(|p| p.link.remote_sku == remote_sku)
            .map(|p| p.link.local_sku))
    }
}
