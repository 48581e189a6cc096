//! The gateway every marketplace call goes through.
//!
//! # Contract
//! - Callers never touch an adapter directly; [`MarketplaceClient`] is the
//!   only path, so every call is rate limited, retried, and reported.
//! - Every attempt passes through the rate limiter; retries are not free.
//! - Exactly one [`SyncResult`] is emitted per logical call, on success or
//!   terminal failure.
//! - Adapter futures are bounded by the client's per-call timeout; an
//!   elapsed timeout is `Transient`.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mps_schemas::{
    InventoryUpdate, MarketplaceId, MarketplaceRequest, Operation, RemoteOrder, RemoteProduct,
    SyncError, SyncResult,
};
use serde_json::json;

use crate::adapter::{AuthContext, MarketplaceAdapter};
use crate::credentials::{CredentialKey, CredentialStore};
use crate::error::{CallError, Failure};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryExecutor;

// ---------------------------------------------------------------------------
// Result sinks
// ---------------------------------------------------------------------------

/// Receives one [`SyncResult`] per completed request.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: &SyncResult);
}

/// Discards results.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn record(&self, _result: &SyncResult) {}
}

/// Keeps every result in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    results: Mutex<Vec<SyncResult>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<SyncResult> {
        match self.results.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResultSink for RecordingSink {
    fn record(&self, result: &SyncResult) {
        match self.results.lock() {
            Ok(mut g) => g.push(result.clone()),
            Err(poisoned) => poisoned.into_inner().push(result.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// MarketplaceClient
// ---------------------------------------------------------------------------

pub struct MarketplaceClient {
    adapter: Arc<dyn MarketplaceAdapter>,
    key: CredentialKey,
    credentials: Arc<CredentialStore>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    sink: Arc<dyn ResultSink>,
    call_timeout: Duration,
}

impl MarketplaceClient {
    pub fn new(
        adapter: Arc<dyn MarketplaceAdapter>,
        account_id: impl Into<String>,
        credentials: Arc<CredentialStore>,
        limiter: Arc<RateLimiter>,
        retry: RetryExecutor,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let key = CredentialKey::new(adapter.marketplace(), account_id);
        Self {
            adapter,
            key,
            credentials,
            limiter,
            retry,
            sink,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn marketplace(&self) -> MarketplaceId {
        self.key.marketplace
    }

    pub fn account_id(&self) -> &str {
        &self.key.account_id
    }

    // -- capability set -----------------------------------------------------

    /// Obtain (or refresh) the session for this account.
    ///
    /// Stateless marketplaces only verify that credentials are linked and
    /// not revoked.
    pub async fn authenticate(&self) -> Result<(), SyncError> {
        let mut request =
            MarketplaceRequest::new(self.marketplace(), Operation::Authenticate, json!({}), Utc::now());
        let outcome = self
            .retry
            .execute(
                |_| async move {
                    self.limiter
                        .acquire(self.marketplace())
                        .await
                        .map_err(Failure::fatal)?;
                    self.credentials
                        .refresh(&self.key, self.adapter.as_ref(), None, Utc::now())
                        .await
                        .map(|_| ())
                        .map_err(Failure::from_auth)
                },
                || async { Ok(()) },
            )
            .await;
        request.attempts = outcome.attempts;
        self.finish(&request, None, outcome.result, outcome.attempts)
    }

    pub async fn list_products(&self) -> Result<Vec<RemoteProduct>, SyncError> {
        self.call(Operation::ListProducts, json!({}), None, |a, auth| async move {
            a.list_products(&auth).await
        })
        .await
    }

    /// Idempotent per (sku, marketplace): resending the same qty/price is safe.
    pub async fn push_inventory(&self, sku: &str, qty: i64, price: f64) -> Result<(), SyncError> {
        let update = InventoryUpdate {
            sku: sku.to_string(),
            qty,
            price,
        };
        let payload = json!({ "sku": sku, "qty": qty, "price": price });
        let update = &update;
        self.call(Operation::PushInventory, payload, Some(sku), |a, auth| async move {
            a.push_inventory(&auth, update).await
        })
        .await
    }

    pub async fn list_orders(&self, since: DateTime<Utc>) -> Result<Vec<RemoteOrder>, SyncError> {
        let payload = json!({ "since": since.to_rfc3339() });
        self.call(Operation::ListOrders, payload, None, |a, auth| async move {
            a.list_orders(&auth, since).await
        })
        .await
    }

    pub async fn acknowledge_order(&self, external_id: &str) -> Result<(), SyncError> {
        let payload = json!({ "order_id": external_id });
        self.call(
            Operation::AcknowledgeOrder,
            payload,
            Some(external_id),
            |a, auth| async move { a.acknowledge_order(&auth, external_id).await },
        )
        .await
    }

    // -- plumbing -----------------------------------------------------------

    async fn call<T, F, Fut>(
        &self,
        operation: Operation,
        payload: serde_json::Value,
        entity: Option<&str>,
        f: F,
    ) -> Result<T, SyncError>
    where
        F: Fn(Arc<dyn MarketplaceAdapter>, AuthContext) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let m = self.marketplace();
        let mut request = MarketplaceRequest::new(m, operation, payload, Utc::now());
        let f = &f;

        let outcome = self
            .retry
            .execute(
                |attempt| async move {
                    self.limiter.acquire(m).await.map_err(Failure::fatal)?;
                    let auth = self
                        .credentials
                        .session(&self.key, self.adapter.as_ref(), Utc::now())
                        .await
                        .map_err(Failure::from_auth)?;
                    let token_in_use = auth.access_token.is_some();
                    tracing::debug!(
                        marketplace = %m,
                        operation = %operation,
                        attempt,
                        "marketplace call"
                    );
                    let result = match tokio::time::timeout(
                        self.call_timeout,
                        f(self.adapter.clone(), auth),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(CallError::Timeout(format!(
                            "no response within {} ms",
                            self.call_timeout.as_millis()
                        ))),
                    };
                    match result {
                        Ok(v) => {
                            self.credentials.record_success(&self.key).await;
                            Ok(v)
                        }
                        Err(e) => {
                            if e.is_auth_rejection() && !token_in_use {
                                self.credentials.record_rejection(&self.key).await;
                            }
                            Err(Failure::from_call(&e, token_in_use))
                        }
                    }
                },
                || async move {
                    let rejected = self
                        .credentials
                        .snapshot(&self.key)
                        .await
                        .and_then(|c| c.access_token);
                    self.credentials
                        .refresh(&self.key, self.adapter.as_ref(), rejected.as_deref(), Utc::now())
                        .await
                        .map(|_| ())
                },
            )
            .await;
        request.attempts = outcome.attempts;
        self.finish(&request, entity, outcome.result, outcome.attempts)
    }

    fn finish<T>(
        &self,
        request: &MarketplaceRequest,
        entity: Option<&str>,
        result: Result<T, SyncError>,
        attempts: u32,
    ) -> Result<T, SyncError> {
        let result = result.map_err(|e| {
            let e = e
                .with_marketplace(request.marketplace)
                .with_operation(request.operation);
            match entity {
                Some(id) if e.context.entity_id.is_none() => e.with_entity(id),
                _ => e,
            }
        });

        let sync_result = SyncResult {
            request_id: request.request_id,
            marketplace: request.marketplace,
            operation: request.operation,
            succeeded: result.is_ok(),
            error_kind: result.as_ref().err().map(|e| e.kind),
            retries_used: attempts.saturating_sub(1),
            finished_at: Utc::now(),
        };
        match &result {
            Ok(_) => tracing::info!(
                request_id = %request.request_id,
                marketplace = %request.marketplace,
                operation = %request.operation,
                retries = sync_result.retries_used,
                "marketplace request succeeded"
            ),
            Err(e) => tracing::warn!(
                request_id = %request.request_id,
                marketplace = %request.marketplace,
                operation = %request.operation,
                retries = sync_result.retries_used,
                error = %e,
                "marketplace request failed"
            ),
        }
        self.sink.record(&sync_result);
        result
    }
}
