use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_client::{
    AuthContext, CallError, CredentialStore, MarketplaceAdapter, MarketplaceClient, RateLimiter,
    RecordingSink, RetryExecutor, RetryPolicy, WindowConfig,
};
use mps_schemas::{
    Credential, ErrorKind, InventoryUpdate, MarketplaceId, Operation, RemoteOrder, RemoteProduct,
};

/// Answers `push_inventory` with one scripted status per attempt, then 200.
struct FlakyPush {
    statuses: Vec<u16>,
    calls: AtomicU32,
}

#[async_trait]
impl MarketplaceAdapter for FlakyPush {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Trendyol
    }

    async fn list_products(&self, _auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        Ok(Vec::new())
    }

    async fn push_inventory(
        &self,
        _auth: &AuthContext,
        update: &InventoryUpdate,
    ) -> Result<(), CallError> {
        assert_eq!(update.sku, "SKU1");
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.statuses.get(n) {
            Some(&code) => Err(CallError::status(code, "scripted")),
            None => Ok(()),
        }
    }

    async fn list_orders(
        &self,
        _auth: &AuthContext,
        _since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        Ok(Vec::new())
    }

    async fn acknowledge_order(&self, _auth: &AuthContext, _id: &str) -> Result<(), CallError> {
        Ok(())
    }
}

fn client(adapter: Arc<FlakyPush>, sink: Arc<RecordingSink>) -> MarketplaceClient {
    let credentials = Arc::new(CredentialStore::default());
    credentials.insert(Credential::new(MarketplaceId::Trendyol, "1001", "key", "secret"));
    let policy = RetryPolicy {
        max_attempts: 4,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(2),
        multiplier: 2.0,
        jitter: false,
    };
    MarketplaceClient::new(
        adapter,
        "1001",
        credentials,
        Arc::new(RateLimiter::new(WindowConfig::new(100, Duration::from_secs(1), 10))),
        RetryExecutor::new(policy),
        sink,
    )
}

#[tokio::test(start_paused = true)]
async fn scenario_push_fails_twice_with_503_then_succeeds() {
    let adapter = Arc::new(FlakyPush {
        statuses: vec![503, 503],
        calls: AtomicU32::new(0),
    });
    let sink = Arc::new(RecordingSink::new());
    let c = client(adapter.clone(), sink.clone());

    c.push_inventory("SKU1", 10, 99.90).await.unwrap();

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    let results = sink.results();
    assert_eq!(results.len(), 1, "exactly one SyncResult per call");
    assert!(results[0].succeeded);
    assert_eq!(results[0].retries_used, 2);
    assert_eq!(results[0].operation, Operation::PushInventory);
    assert_eq!(results[0].error_kind, None);
}

#[tokio::test(start_paused = true)]
async fn scenario_always_transient_is_attempted_exactly_max_attempts() {
    let adapter = Arc::new(FlakyPush {
        statuses: vec![503; 20],
        calls: AtomicU32::new(0),
    });
    let sink = Arc::new(RecordingSink::new());
    let c = client(adapter.clone(), sink.clone());

    let err = c.push_inventory("SKU1", 10, 99.90).await.unwrap_err();

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.kind, ErrorKind::TransientNetwork);
    assert_eq!(err.attempts, 4);
    assert_eq!(err.context.marketplace, Some(MarketplaceId::Trendyol));
    assert_eq!(err.context.entity_id.as_deref(), Some("SKU1"));

    let results = sink.results();
    assert_eq!(results.len(), 1);
    assert!(!results[0].succeeded);
    assert_eq!(results[0].retries_used, 3);
    assert_eq!(results[0].error_kind, Some(ErrorKind::TransientNetwork));
}

#[tokio::test(start_paused = true)]
async fn scenario_validation_error_is_not_retried() {
    let adapter = Arc::new(FlakyPush {
        statuses: vec![400],
        calls: AtomicU32::new(0),
    });
    let sink = Arc::new(RecordingSink::new());
    let c = client(adapter.clone(), sink.clone());

    let err = c.push_inventory("SKU1", 10, 99.90).await.unwrap_err();

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.kind, ErrorKind::PermanentValidation);
    assert_eq!(sink.results()[0].retries_used, 0);
}
