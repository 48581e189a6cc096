use std::sync::Arc;

use mps_runtime::PassStatus;
use mps_schemas::{MarketplaceId, Operation};
use mps_testkit::{fixtures, Harness, ScriptedAdapter};

const YAML: &str = r#"
retry:
  max_attempts: 4
  initial_backoff_ms: 100
  max_backoff_ms: 1000
  jitter: false
marketplaces:
  n11:
    enabled: true
    account_id: "n11-seller"
"#;

#[tokio::test(start_paused = true)]
async fn push_failing_twice_with_503_still_completes_the_pass() {
    let n11 = Arc::new(
        ScriptedAdapter::new(MarketplaceId::N11)
            .with_products(vec![fixtures::remote_product("SKU1")])
            .fail_pushes(&[503, 503]),
    );
    let h = Harness::build(YAML, vec![n11.clone()], &[]).unwrap();
    h.catalog
        .inner()
        .list_product(
            MarketplaceId::N11,
            fixtures::dirty_listing(MarketplaceId::N11, "SKU1", "SKU1", 10, 99.90),
        )
        .await;

    let report = h.orchestrator.run_pass(Some(MarketplaceId::N11)).await.remove(0);
    assert_eq!(report.status, PassStatus::Completed);
    assert_eq!(report.pushed, 1);
    assert_eq!(report.push_failed, 0);

    assert_eq!(n11.push_attempts(), 3);
    let pushes = n11.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].sku, "SKU1");
    assert_eq!(pushes[0].qty, 10);
    assert!((pushes[0].price - 99.90).abs() < 1e-9);

    let push = h
        .results
        .results()
        .into_iter()
        .find(|r| r.operation == Operation::PushInventory)
        .expect("push result recorded");
    assert!(push.succeeded);
    assert_eq!(push.retries_used, 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_push_keeps_product_dirty_for_the_next_pass() {
    let n11 = Arc::new(
        ScriptedAdapter::new(MarketplaceId::N11)
            .with_products(vec![fixtures::remote_product("SKU1")])
            .fail_pushes(&[503, 503, 503, 503]),
    );
    let h = Harness::build(YAML, vec![n11.clone()], &[]).unwrap();
    h.catalog
        .inner()
        .list_product(
            MarketplaceId::N11,
            fixtures::dirty_listing(MarketplaceId::N11, "SKU1", "SKU1", 10, 99.90),
        )
        .await;

    let first = h.orchestrator.run_pass(None).await.remove(0);
    assert_eq!(first.status, PassStatus::Completed, "push failures are not fatal");
    assert_eq!(first.push_failed, 1);
    assert_eq!(h.orchestrator.dirty_skus(MarketplaceId::N11), vec!["SKU1".to_string()]);

    let second = h.orchestrator.run_pass(None).await.remove(0);
    assert_eq!(second.pushed, 1);
    assert!(h.orchestrator.dirty_skus(MarketplaceId::N11).is_empty());
    assert_eq!(n11.push_attempts(), 5);
}
