//! mps-schemas
//!
//! Shared data model for the marketplace synchronization engine.
//!
//! Pure types only: no IO, no clocks (callers pass timestamps in), no
//! marketplace wire shapes. Every other crate in the workspace speaks these
//! types across its boundaries.

mod error;
mod event;
mod mapping;

pub use error::{AuthFailure, ErrorContext, ErrorKind, SyncError};
pub use event::{EventKey, EventType, InboundEvent};
pub use mapping::{MappingEntry, MappingKey, MappingKind, MappingMethod};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MarketplaceId
// ---------------------------------------------------------------------------

/// The closed set of marketplaces the engine integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketplaceId {
    Trendyol,
    Amazon,
    N11,
    Hepsiburada,
    Pazarama,
    Ciceksepeti,
}

impl MarketplaceId {
    pub const ALL: [MarketplaceId; 6] = [
        MarketplaceId::Trendyol,
        MarketplaceId::Amazon,
        MarketplaceId::N11,
        MarketplaceId::Hepsiburada,
        MarketplaceId::Pazarama,
        MarketplaceId::Ciceksepeti,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketplaceId::Trendyol => "trendyol",
            MarketplaceId::Amazon => "amazon",
            MarketplaceId::N11 => "n11",
            MarketplaceId::Hepsiburada => "hepsiburada",
            MarketplaceId::Pazarama => "pazarama",
            MarketplaceId::Ciceksepeti => "ciceksepeti",
        }
    }

    /// Case-insensitive parse. Accepts the Turkish spelling `çiçeksepeti`.
    pub fn parse(s: &str) -> Result<Self, UnknownMarketplace> {
        match s.trim().to_lowercase().as_str() {
            "trendyol" => Ok(MarketplaceId::Trendyol),
            "amazon" => Ok(MarketplaceId::Amazon),
            "n11" => Ok(MarketplaceId::N11),
            "hepsiburada" => Ok(MarketplaceId::Hepsiburada),
            "pazarama" => Ok(MarketplaceId::Pazarama),
            "ciceksepeti" | "çiçeksepeti" => Ok(MarketplaceId::Ciceksepeti),
            _ => Err(UnknownMarketplace(s.to_string())),
        }
    }
}

impl fmt::Display for MarketplaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketplaceId {
    type Err = UnknownMarketplace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Returned by [`MarketplaceId::parse`] for names outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMarketplace(pub String);

impl fmt::Display for UnknownMarketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown marketplace '{}'. expected one of: trendyol | amazon | n11 | hepsiburada | pazarama | ciceksepeti",
            self.0
        )
    }
}

impl std::error::Error for UnknownMarketplace {}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Valid,
    Expired,
    Revoked,
}

/// Per-marketplace, per-account credentials plus the derived session token.
///
/// **Secrets are redacted in `Debug` output.**
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub marketplace: MarketplaceId,
    pub account_id: String,
    pub api_key: String,
    pub api_secret: String,
    /// Long-lived OAuth2 refresh token, for marketplaces that use one.
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
}

impl Credential {
    pub fn new(
        marketplace: MarketplaceId,
        account_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            marketplace,
            account_id: account_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            refresh_token: None,
            access_token: None,
            token_expiry: None,
            status: CredentialStatus::Valid,
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// True when a session token is present and not past `now`.
    pub fn has_live_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.token_expiry) {
            (Some(_), Some(exp)) => exp > now,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("marketplace", &self.marketplace)
            .field("account_id", &self.account_id)
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<REDACTED>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<REDACTED>"))
            .field("token_expiry", &self.token_expiry)
            .field("status", &self.status)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Outbound requests and results
// ---------------------------------------------------------------------------

/// The capability set every marketplace client exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Authenticate,
    ListProducts,
    PushInventory,
    ListOrders,
    AcknowledgeOrder,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Authenticate => "authenticate",
            Operation::ListProducts => "list_products",
            Operation::PushInventory => "push_inventory",
            Operation::ListOrders => "list_orders",
            Operation::AcknowledgeOrder => "acknowledge_order",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical outbound call, alive until it reaches a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceRequest {
    pub request_id: Uuid,
    pub marketplace: MarketplaceId,
    pub operation: Operation,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl MarketplaceRequest {
    pub fn new(
        marketplace: MarketplaceId,
        operation: Operation,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            marketplace,
            operation,
            payload,
            attempts: 0,
            created_at,
        }
    }
}

/// Emitted exactly once per completed [`MarketplaceRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub request_id: Uuid,
    pub marketplace: MarketplaceId,
    pub operation: Operation,
    pub succeeded: bool,
    pub error_kind: Option<ErrorKind>,
    pub retries_used: u32,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Marketplace-side catalog and order shapes (normalized across adapters)
// ---------------------------------------------------------------------------

/// A listing as reported by a marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub sku: String,
    pub remote_id: String,
    pub title: String,
    pub qty: i64,
    pub price: f64,
    #[serde(default)]
    pub barcode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub qty: i64,
    pub unit_price: f64,
}

/// An order as fetched from a marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub external_id: String,
    pub order_number: String,
    /// Marketplace-side creation time; used as the event timestamp.
    pub created_at: DateTime<Utc>,
    pub customer_name: String,
    pub total: f64,
    pub currency: String,
    pub lines: Vec<OrderLine>,
}

/// A single stock/price push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub sku: String,
    pub qty: i64,
    pub price: f64,
}

// ---------------------------------------------------------------------------
// Linkage to catalog-owned records
// ---------------------------------------------------------------------------

/// Correlates a local order with its marketplace origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderLink {
    pub marketplace: MarketplaceId,
    pub external_id: String,
    pub local_id: Option<String>,
}

/// Correlates a local product with its marketplace listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductLink {
    pub marketplace: MarketplaceId,
    /// SKU as the marketplace knows it.
    pub remote_sku: String,
    /// SKU of the local catalog product.
    pub local_sku: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
