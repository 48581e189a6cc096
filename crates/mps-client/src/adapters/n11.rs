//! N11 REST API. Auth: static `appkey` / `appsecret` headers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::{InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct};
use serde::Deserialize;
use serde_json::json;

use super::{from_millis, round2, MAX_PAGES, PAGE_SIZE};
use crate::adapter::{AuthContext, MarketplaceAdapter};
use crate::error::CallError;
use crate::http::{normalize_base, send_empty, send_json};

pub struct N11Adapter {
    http: reqwest::Client,
    base_url: String,
}

impl N11Adapter {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder, auth: &AuthContext) -> reqwest::RequestBuilder {
        req.header("appkey", &auth.api_key)
            .header("appsecret", &auth.api_secret)
    }
}

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
struct N11Product {
    stock_code: String,
    #[serde(default)]
    n11_product_id: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    quantity: i64,
    #[serde(default)]
    sale_price: f64,
    #[serde(default)]
    barcode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct N11Package {
    id: i64,
    order_number: String,
    created_date: i64,
    #[serde(default, rename = "customerfullName")]
    customer_full_name: String,
    #[serde(default)]
    total_amount: f64,
    #[serde(default)]
    lines: Vec<N11Line>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct N11Line {
    stock_code: String,
    quantity: i64,
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reasons: Vec<String>,
}

#[async_trait]
impl MarketplaceAdapter for N11Adapter {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::N11
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        let mut out = Vec::new();
        let mut page: u32 = 0;
        loop {
            let req = self
                .http
                .get(format!("{}/ms/product-query", self.base_url))
                .query(&[("page", page), ("size", PAGE_SIZE)]);
            let body: Page<N11Product> = send_json(self.authed(req, auth)).await?;
            out.extend(body.content.into_iter().map(|p| RemoteProduct {
                remote_id: p
                    .n11_product_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| p.stock_code.clone()),
                sku: p.stock_code,
                title: p.title,
                qty: p.quantity,
                price: p.sale_price,
                barcode: p.barcode,
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
            "payload": {
                "integrator": "mps",
                "skus": [{
                    "stockCode": update.sku,
                    "quantity": update.qty.max(0),
                    "salePrice": round2(update.price),
                    "listPrice": round2(update.price),
                    "currencyType": "TL"
                }]
            }
        });
        let req = self
            .http
            .post(format!("{}/ms/product/tasks/price-stock-update", self.base_url))
            .json(&body);
        let resp: TaskResponse = send_json(self.authed(req, auth)).await?;
        match resp.status.as_deref() {
            Some("REJECT") | Some("REJECTED") => Err(CallError::Rejected(resp.reasons.join("; "))),
            _ if resp.id.is_none() => Err(CallError::Rejected(
                "price-stock task was not created".into(),
            )),
            _ => Ok(()),
        }
    }

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        let mut out = Vec::new();
        let mut page: u32 = 0;
        let start = since.timestamp_millis();
        loop {
            let req = self
                .http
                .get(format!("{}/rest/delivery/v1/shipmentPackages", self.base_url))
                .query(&[
                    ("startDate", start),
                    ("page", page as i64),
                    ("size", PAGE_SIZE as i64),
                ]);
            let body: Page<N11Package> = send_json(self.authed(req, auth)).await?;
            out.extend(body.content.into_iter().map(|p| RemoteOrder {
                external_id: p.id.to_string(),
                order_number: p.order_number,
                created_at: from_millis(p.created_date),
                customer_name: p.customer_full_name,
                total: p.total_amount,
                currency: "TRY".into(),
                lines: p
                    .lines
                    .into_iter()
                    .map(|l| OrderLine {
                        sku: l.stock_code,
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
            .put(format!("{}/rest/order/v1/update", self.base_url))
            .json(&json!({ "packageId": external_id, "status": "Picking" }));
        send_empty(self.authed(req, auth)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_http;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn auth() -> AuthContext {
        AuthContext {
            marketplace: MarketplaceId::N11,
            account_id: String::new(),
            api_key: "app-key".into(),
            api_secret: "app-secret".into(),
            access_token: None,
        }
    }

    fn adapter(server: &MockServer) -> N11Adapter {
        N11Adapter::new(build_http(Duration::from_secs(5)).unwrap(), &server.base_url())
    }

    #[tokio::test]
    async fn sends_key_headers() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ms/product-query")
                    .header("appkey", "app-key")
                    .header("appsecret", "app-secret");
                then.status(200).json_body(serde_json::json!({
                    "content": [{"stockCode": "SKU9", "n11ProductId": 55, "title": "Mug", "quantity": 7, "salePrice": 42.0}],
                    "totalPages": 1
                }));
            })
            .await;
        let products = adapter(&server).list_products(&auth()).await.unwrap();
        m.assert_async().await;
        assert_eq!(products[0].remote_id, "55");
        assert_eq!(products[0].qty, 7);
    }

    #[tokio::test]
    async fn rejected_task_is_rejected_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ms/product/tasks/price-stock-update");
                then.status(200).json_body(serde_json::json!({
                    "id": 1, "status": "REJECT", "reasons": ["unknown stockCode"]
                }));
            })
            .await;
        let update = InventoryUpdate {
            sku: "SKU9".into(),
            qty: 1,
            price: 1.0,
        };
        let err = adapter(&server).push_inventory(&auth(), &update).await.unwrap_err();
        assert_eq!(err, CallError::Rejected("unknown stockCode".into()));
    }

    #[tokio::test]
    async fn accepted_task_is_ok() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ms/product/tasks/price-stock-update");
                then.status(200)
                    .json_body(serde_json::json!({"id": 81, "type": "SKU_UPDATE", "status": "IN_QUEUE"}));
            })
            .await;
        let update = InventoryUpdate {
            sku: "SKU9".into(),
            qty: 1,
            price: 1.0,
        };
        adapter(&server).push_inventory(&auth(), &update).await.unwrap();
    }
}
