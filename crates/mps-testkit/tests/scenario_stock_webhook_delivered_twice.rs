use std::sync::Arc;

use chrono::Utc;
use mps_ingest::{signature, Accepted, Rejected, WebhookReply};
use mps_schemas::MarketplaceId;
use mps_testkit::{fixtures, Harness};
use serde_json::json;

const YAML: &str = r#"
marketplaces:
  trendyol:
    enabled: true
    account_id: "supplier-1"
"#;

#[tokio::test]
async fn signed_stock_update_delivered_twice_sets_stock_once() {
    let h = Harness::build(YAML, Vec::new(), &[(MarketplaceId::Trendyol, "whsec")]).unwrap();
    h.links
        .link(fixtures::link(MarketplaceId::Trendyol, "ABC123", "ABC123"))
        .await;
    h.catalog.inner().set_stock("ABC123", 40).await;

    let body = fixtures::webhook_body("stock.updated", json!({"sku": "ABC123", "qty": 5}));
    let sig = signature::sign("whsec", body.as_bytes());

    let first = h
        .ingestor
        .handle(MarketplaceId::Trendyol, body.as_bytes(), Some(&sig), Utc::now())
        .await;
    let second = h
        .ingestor
        .handle(MarketplaceId::Trendyol, body.as_bytes(), Some(&sig), Utc::now())
        .await;

    assert_eq!(first, Ok(Accepted::Applied));
    assert_eq!(second, Ok(Accepted::Duplicate));
    assert_eq!(WebhookReply::from_result(&second).status, 200);
    assert_eq!(h.catalog.inner().stock_of("ABC123").await, Some(5));
    assert_eq!(h.catalog.inner().stock_writes(), 1);
}

#[tokio::test]
async fn unsigned_delivery_is_rejected_when_a_secret_is_configured() {
    let h = Harness::build(YAML, Vec::new(), &[(MarketplaceId::Trendyol, "whsec")]).unwrap();
    let body = fixtures::webhook_body("stock.updated", json!({"sku": "ABC123", "qty": 5}));

    let r = h
        .ingestor
        .handle(MarketplaceId::Trendyol, body.as_bytes(), None, Utc::now())
        .await;
    assert_eq!(r, Err(Rejected::InvalidSignature));
    assert_eq!(WebhookReply::from_result(&r).status, 401);
    assert_eq!(h.catalog.inner().stock_writes(), 0);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_write_once() {
    let h = Harness::build(YAML, Vec::new(), &[]).unwrap();
    h.links
        .link(fixtures::link(MarketplaceId::Trendyol, "ABC123", "ABC123"))
        .await;
    let body = Arc::new(
        json!({"type": "stock.updated", "id": "evt-77", "data": {"sku": "ABC123", "qty": 9}})
            .to_string(),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let ingestor = h.ingestor.clone();
        let body = body.clone();
        tasks.push(tokio::spawn(async move {
            ingestor
                .handle(MarketplaceId::Trendyol, body.as_bytes(), None, Utc::now())
                .await
        }));
    }
    let mut applied = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(Accepted::Applied) => applied += 1,
            Ok(Accepted::Duplicate) | Ok(Accepted::Queued) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(h.catalog.inner().stock_of("ABC123").await, Some(9));
    assert_eq!(h.catalog.inner().stock_writes(), 1);
}
