//! Amazon Selling Partner API.
//!
//! Auth: OAuth2 refresh-token grant (LWA). The access token travels in the
//! `x-amz-access-token` header and lives about an hour.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use mps_schemas::{
    Credential, InventoryUpdate, MarketplaceId, OrderLine, RemoteOrder, RemoteProduct,
};
use serde::Deserialize;
use serde_json::json;

use super::{parse_timestamp, round2, MAX_PAGES};
use crate::adapter::{AuthContext, IssuedToken, MarketplaceAdapter};
use crate::error::CallError;
use crate::http::{join_segments, normalize_base, send_json};

pub const DEFAULT_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";

/// Amazon.com.tr marketplace id.
const TR_MARKETPLACE_ID: &str = "A33AVAJ2PDY3EV";

const TOKEN_HEADER: &str = "x-amz-access-token";

pub struct AmazonAdapter {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
}

impl AmazonAdapter {
    pub fn new(http: reqwest::Client, base_url: &str, token_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
            token_url: token_url.into(),
        }
    }

    async fn order_items(&self, token: &str, order_id: &str) -> Result<Vec<OrderLine>, CallError> {
        let url = join_segments(&self.base_url, &["orders", "v0", "orders", order_id, "orderItems"])?;
        let body: Envelope<ItemsPayload> =
            send_json(self.http.get(url).header(TOKEN_HEADER, token)).await?;
        Ok(body
            .payload
            .order_items
            .into_iter()
            .map(|i| {
                let qty = i.quantity_ordered.max(1);
                let total = i.item_price.map(|p| p.amount_f64()).unwrap_or(0.0);
                OrderLine {
                    sku: i.seller_sku,
                    qty,
                    unit_price: round2(total / qty as f64),
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    payload: T,
}

#[derive(Debug, Deserialize)]
struct Money {
    #[serde(rename = "Amount", alias = "amount")]
    amount: serde_json::Value,
    #[serde(rename = "CurrencyCode", alias = "currencyCode", default)]
    currency_code: Option<String>,
}

impl Money {
    /// SP-API sends amounts as strings in Orders and numbers in Listings.
    fn amount_f64(&self) -> f64 {
        match &self.amount {
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
            serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingsPage {
    #[serde(default)]
    items: Vec<ListingItem>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingItem {
    sku: String,
    #[serde(default)]
    summaries: Vec<ListingSummary>,
    #[serde(default)]
    offers: Vec<ListingOffer>,
    #[serde(default)]
    fulfillment_availability: Vec<Availability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingSummary {
    #[serde(default)]
    asin: Option<String>,
    #[serde(default)]
    item_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingOffer {
    price: Money,
}

#[derive(Debug, Deserialize)]
struct Availability {
    #[serde(default)]
    quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrdersPayload {
    #[serde(default)]
    orders: Vec<AmzOrder>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmzOrder {
    amazon_order_id: String,
    purchase_date: String,
    #[serde(default)]
    order_total: Option<Money>,
    #[serde(default)]
    buyer_info: Option<BuyerInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BuyerInfo {
    #[serde(default)]
    buyer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPayload {
    #[serde(default)]
    order_items: Vec<AmzItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmzItem {
    #[serde(rename = "SellerSKU")]
    seller_sku: String,
    #[serde(default)]
    quantity_ordered: i64,
    #[serde(default)]
    item_price: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct PatchResponse {
    status: String,
    #[serde(default)]
    issues: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketplaceAdapter for AmazonAdapter {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Amazon
    }

    fn uses_session_token(&self) -> bool {
        true
    }

    async fn issue_token(&self, credential: &Credential) -> Result<IssuedToken, CallError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| CallError::Rejected("no refresh token linked".into()))?;
        let req = self.http.post(&self.token_url).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", credential.api_key.as_str()),
            ("client_secret", credential.api_secret.as_str()),
        ]);
        let token: TokenResponse = send_json(req).await?;
        Ok(IssuedToken {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        let token = auth.bearer()?;
        let url = join_segments(&self.base_url, &["listings", "2021-08-01", "items", auth.account_id.as_str()])?;
        let mut out = Vec::new();
        let mut next: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut req = self
                .http
                .get(url.clone())
                .header(TOKEN_HEADER, token)
                .query(&[
                    ("marketplaceIds", TR_MARKETPLACE_ID),
                    ("includedData", "summaries,offers,fulfillmentAvailability"),
                    ("pageSize", "20"),
                ]);
            if let Some(t) = &next {
                req = req.query(&[("pageToken", t.as_str())]);
            }
            let page: ListingsPage = send_json(req).await?;
            out.extend(page.items.into_iter().map(|i| {
                let summary = i.summaries.into_iter().next();
                RemoteProduct {
                    remote_id: summary
                        .as_ref()
                        .and_then(|s| s.asin.clone())
                        .unwrap_or_else(|| i.sku.clone()),
                    title: summary.and_then(|s| s.item_name).unwrap_or_default(),
                    qty: i.fulfillment_availability.first().map(|a| a.quantity).unwrap_or(0),
                    price: i.offers.first().map(|o| o.price.amount_f64()).unwrap_or(0.0),
                    barcode: None,
                    sku: i.sku,
                }
            }));
            next = page.pagination.and_then(|p| p.next_token);
            if next.is_none() {
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
        let token = auth.bearer()?;
        let url = join_segments(
            &self.base_url,
            &["listings", "2021-08-01", "items", auth.account_id.as_str(), update.sku.as_str()],
        )?;
        let body = json!({
            "productType": "PRODUCT",
            "patches": [
                {
                    "op": "replace",
                    "path": "/attributes/fulfillment_availability",
                    "value": [{"fulfillment_channel_code": "DEFAULT", "quantity": update.qty.max(0)}]
                },
                {
                    "op": "replace",
                    "path": "/attributes/purchasable_offer",
                    "value": [{
                        "marketplace_id": TR_MARKETPLACE_ID,
                        "currency": "TRY",
                        "our_price": [{"schedule": [{"value_with_tax": round2(update.price)}]}]
                    }]
                }
            ]
        });
        let req = self
            .http
            .patch(url)
            .header(TOKEN_HEADER, token)
            .query(&[("marketplaceIds", TR_MARKETPLACE_ID)])
            .json(&body);
        let resp: PatchResponse = send_json(req).await?;
        if resp.status.eq_ignore_ascii_case("INVALID") {
            return Err(CallError::Rejected(format!(
                "listing patch invalid: {}",
                serde_json::Value::Array(resp.issues)
            )));
        }
        Ok(())
    }

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        let token = auth.bearer()?;
        let url = join_segments(&self.base_url, &["orders", "v0", "orders"])?;
        let created_after = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut out = Vec::new();
        let mut next: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut req = self.http.get(url.clone()).header(TOKEN_HEADER, token);
            req = match &next {
                Some(t) => req.query(&[
                    ("MarketplaceIds", TR_MARKETPLACE_ID),
                    ("NextToken", t.as_str()),
                ]),
                None => req.query(&[
                    ("MarketplaceIds", TR_MARKETPLACE_ID),
                    ("CreatedAfter", created_after.as_str()),
                ]),
            };
            let page: Envelope<OrdersPayload> = send_json(req).await?;
            for o in page.payload.orders {
                let lines = self.order_items(token, &o.amazon_order_id).await?;
                let created_at = parse_timestamp(&o.purchase_date).ok_or_else(|| {
                    CallError::Decode(format!("bad PurchaseDate '{}'", o.purchase_date))
                })?;
                let (total, currency) = match &o.order_total {
                    Some(m) => (
                        m.amount_f64(),
                        m.currency_code.clone().unwrap_or_else(|| "TRY".into()),
                    ),
                    None => (0.0, "TRY".into()),
                };
                out.push(RemoteOrder {
                    order_number: o.amazon_order_id.clone(),
                    external_id: o.amazon_order_id,
                    created_at,
                    customer_name: o.buyer_info.and_then(|b| b.buyer_name).unwrap_or_default(),
                    total,
                    currency,
                    lines,
                });
            }
            next = page.payload.next_token;
            if next.is_none() {
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
        let token = auth.bearer()?;
        let url = join_segments(&self.base_url, &["orders", "v0", "orders", external_id, "shipment"])?;
        let req = self
            .http
            .post(url)
            .header(TOKEN_HEADER, token)
            .json(&json!({
                "marketplaceId": TR_MARKETPLACE_ID,
                "shipmentStatus": "ReadyForPickup"
            }));
        crate::http::send_empty(req).await
    }
}
