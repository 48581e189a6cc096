//! Çiçeksepeti supplier API. Auth: static `x-api-key` header.
//!
//! The order endpoint returns one row per order item; rows are grouped back
//! into orders by `orderId`, preserving first-seen order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::{InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct};
use serde::Deserialize;
use serde_json::json;

use super::{parse_timestamp, round2, MAX_PAGES, PAGE_SIZE};
use crate::adapter::{AuthContext, MarketplaceAdapter};
use crate::error::CallError;
use crate::http::{normalize_base, send_empty, send_json};

pub struct CiceksepetiAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl CiceksepetiAdapter {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder, auth: &AuthContext) -> reqwest::RequestBuilder {
        req.header("x-api-key", &auth.api_key)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductsPage {
    #[serde(default)]
    total_count: u32,
    #[serde(default)]
    products: Vec<CsProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsProduct {
    stock_code: String,
    #[serde(default)]
    product_code: Option<String>,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    stock_quantity: i64,
    #[serde(default)]
    sales_price: f64,
    #[serde(default)]
    barcode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrdersPage {
    #[serde(default)]
    supplier_order_list_with_branch: Vec<CsOrderRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsOrderRow {
    order_id: i64,
    order_create_date: String,
    #[serde(default)]
    receiver_name: String,
    /// Supplier stock code of the item.
    code: String,
    quantity: i64,
    /// Line total (unit price times quantity).
    #[serde(default)]
    total_price: f64,
}

/// Collapse per-item rows into orders.
fn group_rows(rows: Vec<CsOrderRow>) -> Result<Vec<RemoteOrder>, CallError> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut out: Vec<RemoteOrder> = Vec::new();
    for row in rows {
        let qty = row.quantity.max(1);
        let line = OrderLine {
            sku: row.code,
            qty: row.quantity,
            unit_price: round2(row.total_price / qty as f64),
        };
        match index.get(&row.order_id) {
            Some(&i) => {
                out[i].total = round2(out[i].total + row.total_price);
                out[i].lines.push(line);
            }
            None => {
                let created_at = parse_timestamp(&row.order_create_date).ok_or_else(|| {
                    CallError::Decode(format!("bad orderCreateDate '{}'", row.order_create_date))
                })?;
                index.insert(row.order_id, out.len());
                out.push(RemoteOrder {
                    external_id: row.order_id.to_string(),
                    order_number: row.order_id.to_string(),
                    created_at,
                    customer_name: row.receiver_name,
                    total: round2(row.total_price),
                    currency: "TRY".into(),
                    lines: vec![line],
                });
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl MarketplaceAdapter for CiceksepetiAdapter {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Ciceksepeti
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let req = self
                .http
                .get(format!("{}/api/v1/Products", self.base_url))
                .query(&[("PageSize", PAGE_SIZE), ("Page", page)]);
            let body: ProductsPage = send_json(self.authed(req, auth)).await?;
            let fetched = body.products.len();
            out.extend(body.products.into_iter().map(|p| RemoteProduct {
                remote_id: p.product_code.unwrap_or_else(|| p.stock_code.clone()),
                sku: p.stock_code,
                title: p.product_name,
                qty: p.stock_quantity,
                price: p.sales_price,
                barcode: p.barcode,
            }));
            if fetched == 0 || out.len() as u32 >= body.total_count {
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
        let price = round2(update.price);
        let req = self
            .http
            .put(format!("{}/api/v1/Products/price-and-stock", self.base_url))
            .json(&json!({
                "items": [{
                    "stockCode": update.sku,
                    "stockQuantity": update.qty.max(0),
                    "salesPrice": price,
                    "listPrice": price,
                }]
            }));
        let resp: serde_json::Value = send_json(self.authed(req, auth)).await?;
        if resp.get("batchId").is_none() {
            return Err(CallError::Rejected(format!("price-and-stock not accepted: {resp}")));
        }
        Ok(())
    }

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        let start = since.format("%Y-%m-%dT%H:%M:%S").to_string();
        let end = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut rows = Vec::new();
        for page in 0..MAX_PAGES {
            let req = self
                .http
                .post(format!("{}/api/v1/Order/GetOrders", self.base_url))
                .json(&json!({
                    "startDate": start,
                    "endDate": end,
                    "pageSize": PAGE_SIZE,
                    "page": page,
                }));
            let body: OrdersPage = send_json(self.authed(req, auth)).await?;
            let fetched = body.supplier_order_list_with_branch.len();
            rows.extend(body.supplier_order_list_with_branch);
            if fetched < PAGE_SIZE as usize {
                break;
            }
        }
        group_rows(rows)
    }

    async fn acknowledge_order(
        &self,
        auth: &AuthContext,
        external_id: &str,
    ) -> Result<(), CallError> {
        let order_id: i64 = external_id
            .parse()
            .map_err(|_| CallError::Rejected(format!("order id '{external_id}' is not numeric")))?;
        let req = self
            .http
            .put(format!("{}/api/v1/Order/readyforcargo", self.base_url))
            .json(&json!({ "orderIds": [order_id] }));
        send_empty(self.authed(req, auth)).await
    }
}
