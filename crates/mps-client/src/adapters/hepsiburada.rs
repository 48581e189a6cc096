//! Hepsiburada merchant API.
//!
//! Auth: every request is signed. `X-Signature` is the hex HMAC-SHA256 of
//! `METHOD\nPATH\nTIMESTAMP\nBODY` under the api secret, `X-Timestamp` is
//! unix seconds. The merchant id is the account id.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mps_schemas::{InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use super::{parse_timestamp, round2, MAX_PAGES, PAGE_SIZE};
use crate::adapter::{AuthContext, MarketplaceAdapter};
use crate::error::CallError;
use crate::http::{join_segments, normalize_base, send_empty, send_json};
use crate::sign::sign_request;

pub struct HepsiburadaAdapter {
    http: reqwest::Client,
    base_url: String,
    clock: fn() -> DateTime<Utc>,
}

impl HepsiburadaAdapter {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
            clock: Utc::now,
        }
    }

    /// Fixed clock for signature tests.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, CallError> {
        join_segments(&self.base_url, segments)
    }

    fn signed(
        &self,
        method: Method,
        url: reqwest::Url,
        body: Option<String>,
        auth: &AuthContext,
    ) -> reqwest::RequestBuilder {
        let ts = (self.clock)().timestamp().to_string();
        let body = body.unwrap_or_default();
        let signature = sign_request(&auth.api_secret, method.as_str(), url.path(), &ts, &body);
        let mut req = self
            .http
            .request(method, url)
            .header("X-Api-Key", &auth.api_key)
            .header("X-Merchant-Id", &auth.account_id)
            .header("X-Timestamp", ts)
            .header("X-Signature", signature);
        if !body.is_empty() {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }
        req
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingsPage {
    #[serde(default)]
    total_count: u32,
    #[serde(default)]
    listings: Vec<HbListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HbListing {
    merchant_sku: String,
    #[serde(default)]
    hepsiburada_sku: Option<String>,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    available_stock: i64,
    #[serde(default)]
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrdersPage {
    #[serde(default)]
    total_count: u32,
    #[serde(default)]
    items: Vec<HbOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HbOrder {
    order_id: String,
    order_number: String,
    order_date: String,
    #[serde(default)]
    customer: Option<HbCustomer>,
    #[serde(default)]
    total_price: Option<HbMoney>,
    #[serde(default)]
    lines: Vec<HbLine>,
}

#[derive(Debug, Deserialize)]
struct HbCustomer {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct HbMoney {
    amount: f64,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HbLine {
    merchant_sku: String,
    quantity: i64,
    unit_price: HbMoney,
}

#[async_trait]
impl MarketplaceAdapter for HepsiburadaAdapter {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Hepsiburada
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        let url = self.url(&["listings", "merchantid", auth.account_id.as_str()])?;
        let mut out = Vec::new();
        let mut offset: u32 = 0;
        for _ in 0..MAX_PAGES {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &PAGE_SIZE.to_string());
            let page: ListingsPage = send_json(self.signed(Method::GET, page_url, None, auth)).await?;
            let fetched = page.listings.len() as u32;
            out.extend(page.listings.into_iter().map(|l| RemoteProduct {
                remote_id: l.hepsiburada_sku.unwrap_or_else(|| l.merchant_sku.clone()),
                sku: l.merchant_sku,
                title: l.product_name,
                qty: l.available_stock,
                price: l.price,
                barcode: None,
            }));
            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
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
        let url = self.url(&[
            "listings",
            "merchantid",
            auth.account_id.as_str(),
            "inventory-uploads",
        ])?;
        let body = json!([{
            "merchantSku": update.sku,
            "availableStock": update.qty.max(0),
            "price": round2(update.price),
        }])
        .to_string();
        let resp: serde_json::Value =
            send_json(self.signed(Method::POST, url, Some(body), auth)).await?;
        if resp.get("id").is_none() {
            return Err(CallError::Rejected(format!("inventory upload not accepted: {resp}")));
        }
        Ok(())
    }

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        let url = self.url(&["orders", "merchantid", auth.account_id.as_str()])?;
        let begin = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut out = Vec::new();
        let mut offset: u32 = 0;
        for _ in 0..MAX_PAGES {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("begindate", &begin)
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &PAGE_SIZE.to_string());
            let page: OrdersPage = send_json(self.signed(Method::GET, page_url, None, auth)).await?;
            let fetched = page.items.len() as u32;
            for o in page.items {
                let created_at = parse_timestamp(&o.order_date)
                    .ok_or_else(|| CallError::Decode(format!("bad orderDate '{}'", o.order_date)))?;
                let (total, currency) = match o.total_price {
                    Some(m) => (m.amount, m.currency.unwrap_or_else(|| "TRY".into())),
                    None => (0.0, "TRY".into()),
                };
                out.push(RemoteOrder {
                    external_id: o.order_id,
                    order_number: o.order_number,
                    created_at,
                    customer_name: o.customer.map(|c| c.name).unwrap_or_default(),
                    total,
                    currency,
                    lines: o
                        .lines
                        .into_iter()
                        .map(|l| OrderLine {
                            sku: l.merchant_sku,
                            qty: l.quantity,
                            unit_price: l.unit_price.amount,
                        })
                        .collect(),
                });
            }
            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
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
        let url = self.url(&[
            "orders",
            "merchantid",
            auth.account_id.as_str(),
            "id",
            external_id,
            "acknowledge",
        ])?;
        send_empty(self.signed(Method::POST, url, None, auth)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_http;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn auth() -> AuthContext {
        AuthContext {
            marketplace: MarketplaceId::Hepsiburada,
            account_id: "m-77".into(),
            api_key: "hb-key".into(),
            api_secret: "hb-secret".into(),
            access_token: None,
        }
    }

    fn adapter(server: &MockServer) -> HepsiburadaAdapter {
        HepsiburadaAdapter::new(build_http(Duration::from_secs(5)).unwrap(), &server.base_url())
            .with_clock(fixed_clock)
    }

    #[tokio::test]
    async fn push_is_signed_over_method_path_timestamp_body() {
        let server = MockServer::start_async().await;
        let ts = fixed_clock().timestamp().to_string();
        let body = r#"[{"availableStock":3,"merchantSku":"SKU1","price":50.0}]"#;
        let expected = sign_request(
            "hb-secret",
            "POST",
            "/listings/merchantid/m-77/inventory-uploads",
            &ts,
            body,
        );
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/listings/merchantid/m-77/inventory-uploads")
                    .header("X-Timestamp", ts.as_str())
                    .header("X-Signature", expected.as_str())
                    .header("X-Merchant-Id", "m-77");
                then.status(200).json_body(serde_json::json!({"id": "upload-1"}));
            })
            .await;
        let update = InventoryUpdate {
            sku: "SKU1".into(),
            qty: 3,
            price: 50.0,
        };
        adapter(&server).push_inventory(&auth(), &update).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn listings_paginate_by_offset() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/listings/merchantid/m-77")
                    .query_param("offset", "0");
                then.status(200).json_body(serde_json::json!({
                    "totalCount": 2,
                    "listings": [{"merchantSku": "A", "hepsiburadaSku": "HBV1", "availableStock": 1, "price": 5.0}]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/listings/merchantid/m-77")
                    .query_param("offset", "1");
                then.status(200).json_body(serde_json::json!({
                    "totalCount": 2,
                    "listings": [{"merchantSku": "B", "availableStock": 0, "price": 6.0}]
                }));
            })
            .await;
        let products = adapter(&server).list_products(&auth()).await.unwrap();
        let skus: Vec<_> = products.iter().map(|p| p.sku.as_str()).collect();
        assert_eq!(skus, vec!["A", "B"]);
        assert_eq!(products[0].remote_id, "HBV1");
    }

    #[tokio::test]
    async fn bad_signature_surfaces_auth_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/merchantid/m-77");
                then.status(401).body("signature mismatch");
            })
            .await;
        let err = adapter(&server)
            .list_orders(&auth(), fixed_clock())
            .await
            .unwrap_err();
        assert!(err.is_auth_rejection());
    }
}
