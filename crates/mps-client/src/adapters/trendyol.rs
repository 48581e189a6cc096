//! Trendyol supplier API.
//!
//! Auth: HTTP Basic (api key : api secret). Every path carries the supplier
//! id, which is the account id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::{InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct};
use serde::Deserialize;
use serde_json::json;

use super::{from_millis, round2, MAX_PAGES, PAGE_SIZE};
use crate::adapter::{AuthContext, MarketplaceAdapter};
use crate::error::CallError;
use crate::http::{normalize_base, send_empty, send_json};

pub struct TrendyolAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl TrendyolAdapter {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
        }
    }

    fn supplier_url(&self, auth: &AuthContext, path: &str) -> String {
        format!("{}/suppliers/{}/{}", self.base_url, auth.account_id, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder, auth: &AuthContext) -> reqwest::RequestBuilder {
        req.basic_auth(&auth.api_key, Some(&auth.api_secret))
            .header("User-Agent", format!("{} - SelfIntegration", auth.account_id))
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    content: Vec<T>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TyProduct {
    barcode: String,
    #[serde(default)]
    stock_code: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    quantity: i64,
    #[serde(default)]
    sale_price: f64,
    #[serde(default)]
    product_content_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TyPackage {
    id: serde_json::Value,
    order_number: String,
    order_date: i64,
    #[serde(default)]
    customer_first_name: String,
    #[serde(default)]
    customer_last_name: String,
    #[serde(default)]
    total_price: f64,
    #[serde(default = "default_currency")]
    currency_code: String,
    #[serde(default)]
    lines: Vec<TyLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TyLine {
    merchant_sku: String,
    quantity: i64,
    price: f64,
}

fn default_currency() -> String {
    "TRY".to_string()
}

fn id_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketplaceAdapter for TrendyolAdapter {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Trendyol
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        let mut out = Vec::new();
        let mut page: u32 = 0;
        loop {
            let req = self
                .http
                .get(self.supplier_url(auth, "products"))
                .query(&[("page", page), ("size", PAGE_SIZE)]);
            let body: Page<TyProduct> = send_json(self.authed(req, auth)).await?;
            out.extend(body.content.into_iter().map(|p| RemoteProduct {
                sku: p.stock_code.clone().unwrap_or_else(|| p.barcode.clone()),
                remote_id: p
                    .product_content_id
                    .as_ref()
                    .map(id_string)
                    .unwrap_or_else(|| p.barcode.clone()),
                title: p.title,
                qty: p.quantity,
                price: p.sale_price,
                barcode: Some(p.barcode),
            }));
            page += 1;
            if page >= body.total_pages || page >= MAX_PAGES {
                break;
            }
        }
        Ok(out)
    }

    async fn push_inventory(
        &self,
        auth: &AuthContext,
        update: &InventoryUpdate,
    ) -> Result<(), CallError> {
        let body = json!({
            "items": [{
                "barcode": update.sku,
                "quantity": update.qty.max(0),
                "salePrice": round2(update.price),
                "listPrice": round2(update.price),
            }]
        });
        let req = self
            .http
            .post(self.supplier_url(auth, "products/price-and-inventory"))
            .json(&body);
        let resp: serde_json::Value = send_json(self.authed(req, auth)).await?;
        if resp.get("batchRequestId").is_none() {
            return Err(CallError::Rejected(format!(
                "no batchRequestId in response: {resp}"
            )));
        }
        Ok(())
    }

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        let mut out = Vec::new();
        let mut page: u32 = 0;
        let start = since.timestamp_millis().to_string();
        let size = PAGE_SIZE.to_string();
        loop {
            let page_s = page.to_string();
            let req = self.http.get(self.supplier_url(auth, "orders")).query(&[
                ("startDate", start.as_str()),
                ("page", page_s.as_str()),
                ("size", size.as_str()),
                ("orderByField", "CreatedDate"),
                ("orderByDirection", "ASC"),
            ]);
            let body: Page<TyPackage> = send_json(self.authed(req, auth)).await?;
            out.extend(body.content.into_iter().map(|p| RemoteOrder {
                external_id: id_string(&p.id),
                order_number: p.order_number,
                created_at: from_millis(p.order_date),
                customer_name: format!("{} {}", p.customer_first_name, p.customer_last_name)
                    .trim()
                    .to_string(),
                total: p.total_price,
                currency: p.currency_code,
                lines: p
                    .lines
                    .into_iter()
                    .map(|l| OrderLine {
                        sku: l.merchant_sku,
                        qty: l.quantity,
                        unit_price: l.price,
                    })
                    .collect(),
            }));
            page += 1;
            if page >= body.total_pages || page >= MAX_PAGES {
                break;
            }
        }
        Ok(out)
    }

    async fn acknowledge_order(
        &self,
        auth: &AuthContext,
        external_id: &str,
    ) -> Result<(), CallError> {
        let req = self
            .http
            .put(self.supplier_url(auth, &format!("shipment-packages/{external_id}")))
            .json(&json!({ "status": "Picking" }));
        send_empty(self.authed(req, auth)).await
    }
}
