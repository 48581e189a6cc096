//! Pazarama merchant gateway. Auth: OAuth2 client-credentials bearer.
//!
//! Responses are wrapped in `{ "data": ..., "success": bool, "userMessage" }`;
//! `success: false` on a 200 is an application-level rejection.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mps_schemas::{
    Credential, InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{parse_timestamp, round2, MAX_PAGES, PAGE_SIZE};
use crate::adapter::{AuthContext, IssuedToken, MarketplaceAdapter};
use crate::error::CallError;
use crate::http::{normalize_base, send_json};

pub const DEFAULT_TOKEN_URL: &str = "https://isortagimgiris.pazarama.com/connect/token";

const SCOPE: &str = "merchantgatewayapi.fullaccess";

pub struct PazaramaAdapter {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
}

impl PazaramaAdapter {
    pub fn new(http: reqwest::Client, base_url: &str, token_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
            token_url: token_url.into(),
        }
    }

    async fn call<T: DeserializeOwned + Default>(
        &self,
        req: reqwest::RequestBuilder,
        auth: &AuthContext,
    ) -> Result<T, CallError> {
        let env: Wrapped<T> = send_json(req.bearer_auth(auth.bearer()?)).await?;
        env.into_data()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wrapped<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default = "yes")]
    success: bool,
    #[serde(default)]
    user_message: Option<String>,
}

fn yes() -> bool {
    true
}

impl<T: Default> Wrapped<T> {
    fn into_data(self) -> Result<T, CallError> {
        if !self.success {
            return Err(CallError::Rejected(
                self.user_message.unwrap_or_else(|| "success=false".into()),
            ));
        }
        Ok(self.data.unwrap_or_default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PzProduct {
    code: String,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    stock_count: i64,
    #[serde(default)]
    sale_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PzOrder {
    order_id: String,
    order_number: serde_json::Value,
    order_date: String,
    #[serde(default)]
    customer_name: String,
    #[serde(default)]
    order_amount: f64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    items: Vec<PzItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PzItem {
    product: PzItemProduct,
    quantity: i64,
    sale_price: PzPrice,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PzItemProduct {
    stock_code: String,
}

#[derive(Debug, Deserialize)]
struct PzPrice {
    value: f64,
}

#[async_trait]
impl MarketplaceAdapter for PazaramaAdapter {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Pazarama
    }

    fn uses_session_token(&self) -> bool {
        true
    }

    async fn issue_token(&self, credential: &Credential) -> Result<IssuedToken, CallError> {
        let req = self
            .http
            .post(&self.token_url)
            .basic_auth(&credential.api_key, Some(&credential.api_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", SCOPE)]);
        let env: Wrapped<TokenData> = send_json(req).await?;
        let data = env.into_data()?;
        if data.access_token.is_empty() {
            return Err(CallError::Rejected("token response without accessToken".into()));
        }
        Ok(IssuedToken {
            access_token: data.access_token,
            expires_at: data
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let req = self
                .http
                .get(format!("{}/product/products", self.base_url))
                .query(&[
                    ("Approved", "true".to_string()),
                    ("Page", page.to_string()),
                    ("Size", PAGE_SIZE.to_string()),
                ]);
            let items: Vec<PzProduct> = self.call(req, auth).await?;
            let fetched = items.len();
            out.extend(items.into_iter().map(|p| RemoteProduct {
                remote_id: p.product_id.unwrap_or_else(|| p.code.clone()),
                sku: p.code,
                title: p.name,
                qty: p.stock_count,
                price: p.sale_price,
                barcode: None,
            }));
            if fetched < PAGE_SIZE as usize {
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
        let stock = self
            .http
            .post(format!("{}/product/updateStock-v2", self.base_url))
            .json(&json!({ "items": [{ "code": update.sku, "stockCount": update.qty.max(0) }] }));
        let _: serde_json::Value = self.call(stock, auth).await?;

        let price = round2(update.price);
        let price_req = self
            .http
            .post(format!("{}/product/updatePrice-v2", self.base_url))
            .json(&json!({ "items": [{ "code": update.sku, "listPrice": price, "salePrice": price }] }));
        let _: serde_json::Value = self.call(price_req, auth).await?;
        Ok(())
    }

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        let start = since.format("%Y-%m-%dT%H:%M:%S").to_string();
        let end = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let req = self
                .http
                .post(format!("{}/order/getOrdersForApi", self.base_url))
                .json(&json!({
                    "startDate": start,
                    "endDate": end,
                    "pageSize": PAGE_SIZE,
                    "pageNumber": page,
                }));
            let orders: Vec<PzOrder> = self.call(req, auth).await?;
            let fetched = orders.len();
            for o in orders {
                let created_at = parse_timestamp(&o.order_date)
                    .ok_or_else(|| CallError::Decode(format!("bad orderDate '{}'", o.order_date)))?;
                out.push(RemoteOrder {
                    order_number: match &o.order_number {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                    external_id: o.order_id,
                    created_at,
                    customer_name: o.customer_name,
                    total: o.order_amount,
                    currency: o.currency.unwrap_or_else(|| "TRY".into()),
                    lines: o
                        .items
                        .into_iter()
                        .map(|i| OrderLine {
                            sku: i.product.stock_code,
                            qty: i.quantity,
                            unit_price: i.sale_price.value,
                        })
                        .collect(),
                });
            }
            if fetched < PAGE_SIZE as usize {
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
            .put(format!("{}/order/updateOrderStatus", self.base_url))
            .json(&json!({ "orderId": external_id, "status": "Preparing" }));
        let _: serde_json::Value = self.call(req, auth).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_http;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn adapter(server: &MockServer) -> PazaramaAdapter {
        PazaramaAdapter::new(
            build_http(Duration::from_secs(5)).unwrap(),
            &server.base_url(),
            server.url("/connect/token"),
        )
    }

    fn auth() -> AuthContext {
        AuthContext {
            marketplace: MarketplaceId::Pazarama,
            account_id: String::new(),
            api_key: "pz-client".into(),
            api_secret: "pz-secret".into(),
            access_token: Some("bearer-1".into()),
        }
    }

    #[tokio::test]
    async fn client_credentials_grant() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/connect/token")
                    .body_contains("grant_type=client_credentials");
                then.status(200).json_body(serde_json::json!({
                    "data": {"accessToken": "bearer-1", "expiresIn": 3600},
                    "success": true
                }));
            })
            .await;
        let cred = Credential::new(MarketplaceId::Pazarama, "", "pz-client", "pz-secret");
        let tok = adapter(&server).issue_token(&cred).await.unwrap();
        m.assert_async().await;
        assert_eq!(tok.access_token, "bearer-1");
    }

    #[tokio::test]
    async fn push_updates_stock_then_price() {
        let server = MockServer::start_async().await;
        let stock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/product/updateStock-v2")
                    .header("authorization", "Bearer bearer-1");
                then.status(200).json_body(serde_json::json!({"data": null, "success": true}));
            })
            .await;
        let price = server
            .mock_async(|when, then| {
                when.method(POST).path("/product/updatePrice-v2");
                then.status(200).json_body(serde_json::json!({"success": true}));
            })
            .await;
        let update = InventoryUpdate {
            sku: "PZ-1".into(),
            qty: 2,
            price: 19.999,
        };
        adapter(&server).push_inventory(&auth(), &update).await.unwrap();
        stock.assert_async().await;
        price.assert_async().await;
    }

    #[tokio::test]
    async fn success_false_is_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/product/updateStock-v2");
                then.status(200).json_body(serde_json::json!({
                    "success": false, "userMessage": "Ürün bulunamadı"
                }));
            })
            .await;
        let update = InventoryUpdate {
            sku: "PZ-404".into(),
            qty: 2,
            price: 1.0,
        };
        let err = adapter(&server).push_inventory(&auth(), &update).await.unwrap_err();
        assert_eq!(err, CallError::Rejected("Ürün bulunamadı".into()));
    }

    #[tokio::test]
    async fn missing_token_reads_as_unauthorized() {
        let server = MockServer::start_async().await;
        let mut a = auth();
        a.access_token = None;
        let err = adapter(&server).list_products(&a).await.unwrap_err();
        assert!(err.is_auth_rejection());
    }
}
