use std::sync::Arc;

use chrono::Utc;
use mps_ingest::*;
use mps_reconcile::{InMemoryCatalog, InMemoryLedger, InMemoryProductLinks, ReconcileEngine};
use mps_schemas::{MarketplaceId, ProductLink};
use serde_json::json;

#[tokio::test]
async fn second_delivery_succeeds_without_side_effects() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.set_stock("ABC123", 40).await;
    let links = Arc::new(InMemoryProductLinks::new());
    links
        .link(ProductLink {
            marketplace: MarketplaceId::Trendyol,
            remote_sku: "ABC123".into(),
            local_sku: "ABC123".into(),
        })
        .await;
    let engine = Arc::new(ReconcileEngine::new(
        catalog.clone(),
        links,
        Arc::new(InMemoryLedger::new()),
        16,
    ));
    let (queue, worker) = OverflowQueue::bounded(8);
    let _drain = worker.spawn(engine.clone());
    let ingestor = WebhookIngestor::new(engine, queue);

    let body = json!({"type": "stock.updated", "data": {"sku": "ABC123", "qty": 5}}).to_string();

    let first = ingestor
        .handle(MarketplaceId::Trendyol, body.as_bytes(), None, Utc::now())
        .await;
    assert_eq!(first, Ok(Accepted::Applied));
    assert_eq!(WebhookReply::from_result(&first).body, json!({"success": true}));

    let second = ingestor
        .handle(MarketplaceId::Trendyol, body.as_bytes(), None, Utc::now())
        .await;
    assert_eq!(second, Ok(Accepted::Duplicate));
    let reply = WebhookReply::from_result(&second);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["success"], json!(true));

    assert_eq!(catalog.stock_of("ABC123").await, Some(5));
    assert_eq!(catalog.stock_writes(), 1);

    let stats = ingestor.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.duplicates, 1);
}

#[tokio::test]
async fn malformed_body_is_400_and_touches_nothing() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let engine = Arc::new(ReconcileEngine::new(
        catalog.clone(),
        Arc::new(InMemoryProductLinks::new()),
        Arc::new(InMemoryLedger::new()),
        4,
    ));
    let (queue, _worker) = OverflowQueue::bounded(1);
    let ingestor = WebhookIngestor::new(engine, queue);

    let r = ingestor
        .handle(
            MarketplaceId::Ciceksepeti,
            br#"{"type":"stock.updated","data":{"sku":"X","qty":"many"}}"#,
            None,
            Utc::now(),
        )
        .await;
    let reply = WebhookReply::from_result(&r);
    assert_eq!(reply.status, 400);
    assert!(reply.body["error"].is_string());
    assert_eq!(catalog.stock_writes(), 0);
}

#[tokio::test]
async fn stock_value_repeated_after_change_is_applied() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let links = Arc::new(InMemoryProductLinks::new());
    links
        .link(ProductLink {
            marketplace: MarketplaceId::Pazarama,
            remote_sku: "ABC123".into(),
            local_sku: "ABC123".into(),
        })
        .await;
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = Arc::new(ReconcileEngine::new(catalog.clone(), links, ledger.clone(), 16));
    let (queue, _worker) = OverflowQueue::bounded(8);
    let ingestor = WebhookIngestor::new(engine, queue);

    // Restock: 5, sold out, 5 again. None of the bodies carry an id or a time.
    let mut outcomes = Vec::new();
    for qty in [5, 0, 5, 5] {
        let body = json!({"type": "stock.updated", "data": {"sku": "ABC123", "qty": qty}}).to_string();
        outcomes.push(
            ingestor
                .handle(MarketplaceId::Pazarama, body.as_bytes(), None, Utc::now())
                .await,
        );
    }
    assert_eq!(
        outcomes,
        vec![
            Ok(Accepted::Applied),
            Ok(Accepted::Applied),
            Ok(Accepted::Applied),
            Ok(Accepted::Duplicate),
        ]
    );
    assert_eq!(catalog.stock_of("ABC123").await, Some(5));
    assert_eq!(catalog.stock_writes(), 3);
    assert_eq!(ledger.len().await, 0);
}
