//! The per-marketplace wire protocol seam.
//!
//! An adapter knows one marketplace's URLs, auth scheme and payload shapes,
//! and nothing else: no retries, no rate limiting, no credential caching.
//! Those live in [`crate::MarketplaceClient`], which wraps every adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_schemas::{Credential, InventoryUpdate, MarketplaceId, RemoteOrder, RemoteProduct};

use crate::error::CallError;

/// What an adapter needs to authorize one call. **Redacted in `Debug`.**
#[derive(Clone)]
pub struct AuthContext {
    pub marketplace: MarketplaceId,
    pub account_id: String,
    pub api_key: String,
    pub api_secret: String,
    /// Session token for marketplaces with a token exchange.
    pub access_token: Option<String>,
}

impl AuthContext {
    pub fn from_credential(c: &Credential) -> Self {
        Self {
            marketplace: c.marketplace,
            account_id: c.account_id.clone(),
            api_key: c.api_key.clone(),
            api_secret: c.api_secret.clone(),
            access_token: c.access_token.clone(),
        }
    }

    /// Bearer token. A missing session reads as a 401 so the client refreshes.
    pub fn bearer(&self) -> Result<&str, CallError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| CallError::status(401, "no session token issued"))
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("marketplace", &self.marketplace)
            .field("account_id", &self.account_id)
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Result of a token exchange.
#[derive(Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    fn marketplace(&self) -> MarketplaceId;

    /// True when calls carry a session token obtained via [`issue_token`].
    /// Stateless schemes (basic auth, static headers, request signing) return
    /// false and are never asked for a token.
    ///
    /// [`issue_token`]: MarketplaceAdapter::issue_token
    fn uses_session_token(&self) -> bool {
        false
    }

    /// Exchange long-lived credentials for a session token.
    async fn issue_token(&self, _credential: &Credential) -> Result<IssuedToken, CallError> {
        Err(CallError::Rejected(format!(
            "{} does not issue session tokens",
            self.marketplace()
        )))
    }

    async fn list_products(&self, auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError>;

    async fn push_inventory(
        &self,
        auth: &AuthContext,
        update: &InventoryUpdate,
    ) -> Result<(), CallError>;

    async fn list_orders(
        &self,
        auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError>;

    async fn acknowledge_order(&self, auth: &AuthContext, external_id: &str)
        -> Result<(), CallError>;
}
