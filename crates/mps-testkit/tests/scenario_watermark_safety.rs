use std::sync::Arc;

use mps_reconcile::OrderState;
use mps_runtime::{PassStatus, WatermarkStore};
use mps_schemas::MarketplaceId;
use mps_testkit::{fixtures, Harness, ScriptedAdapter};

const YAML: &str = r#"
marketplaces:
  hepsiburada:
    enabled: true
    account_id: "hb-merchant"
"#;

fn five_orders() -> Vec<mps_schemas::RemoteOrder> {
    (1..=5)
        .map(|n| fixtures::order(&format!("HB-{n}"), "SKU1", fixtures::at(n)))
        .collect()
}

#[tokio::test]
async fn failure_after_three_of_five_holds_watermark_and_next_pass_imports_the_rest() {
    let hb = Arc::new(ScriptedAdapter::new(MarketplaceId::Hepsiburada).with_orders(five_orders()));
    let h = Harness::build(YAML, vec![hb.clone()], &[]).unwrap();
    h.catalog.fail_order_once("HB-4").await;

    let first = h.orchestrator.run_pass(None).await.remove(0);
    assert_eq!(first.status, PassStatus::Failed);
    assert_eq!(first.orders_fetched, 5);
    assert_eq!(first.orders_imported, 3);
    assert_eq!(first.watermark, None);
    assert_eq!(h.watermarks.load(MarketplaceId::Hepsiburada).await.unwrap(), None);
    assert_eq!(h.catalog.inner().orders().await.len(), 3);
    assert!(hb.acks().is_empty(), "a failed import acknowledges nothing");

    let second = h.orchestrator.run_pass(None).await.remove(0);
    assert_eq!(second.status, PassStatus::Completed);
    assert_eq!(second.orders_fetched, 5);
    assert_eq!(second.orders_imported, 2);
    assert_eq!(second.orders_duplicate, 3);
    assert_eq!(h.catalog.inner().orders().await.len(), 5);

    // Both passes asked from the same point; the watermark only moved once.
    let sinces = hb.sinces();
    assert_eq!(sinces.len(), 2);
    assert_eq!(sinces[0], sinces[1]);
    let stored = h.watermarks.load(MarketplaceId::Hepsiburada).await.unwrap();
    assert_eq!(stored, second.watermark);
    assert!(stored.is_some());

    let mut acked = hb.acks();
    acked.sort();
    assert_eq!(acked, vec!["HB-1", "HB-2", "HB-3", "HB-4", "HB-5"]);
    assert_eq!(
        h.engine.order_state(MarketplaceId::Hepsiburada, "HB-5"),
        Some(OrderState::Acknowledged)
    );

    let third = h.orchestrator.run_pass(None).await.remove(0);
    assert_eq!(third.orders_imported, 0);
    assert_eq!(hb.sinces()[2], stored.unwrap());
}

#[tokio::test]
async fn list_orders_failure_is_reported_per_marketplace() {
    let hb = Arc::new(
        ScriptedAdapter::new(MarketplaceId::Hepsiburada)
            .with_orders(five_orders())
            .fail_list_orders(&[400]),
    );
    let h = Harness::build(YAML, vec![hb.clone()], &[]).unwrap();

    let report = h.orchestrator.run_pass(None).await.remove(0);
    assert_eq!(report.status, PassStatus::Failed);
    assert_eq!(report.marketplace, MarketplaceId::Hepsiburada);
    assert!(report.error_kind.is_some());
    assert_eq!(h.watermarks.load(MarketplaceId::Hepsiburada).await.unwrap(), None);
    assert!(h.catalog.inner().orders().await.is_empty());
}
