use std::sync::Arc;

use chrono::Utc;
use mps_reconcile::*;
use mps_schemas::{EventType, InboundEvent, MarketplaceId, ProductLink};
use serde_json::json;

fn stock_updated(id: &str, qty: i64) -> InboundEvent {
    InboundEvent {
        marketplace: MarketplaceId::Trendyol,
        event_type: EventType::StockUpdated,
        external_id: id.into(),
        payload: json!({"sku": "ABC123", "qty": qty}),
        occurred_at: Utc::now(),
        received_at: Utc::now(),
        processed_at: None,
        synthetic_id: false,
    }
}

async fn setup() -> (Arc<ReconcileEngine>, Arc<InMemoryCatalog>, Arc<InMemoryLedger>) {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.set_stock("ABC123", 11).await;
    let links = Arc::new(InMemoryProductLinks::new());
    links
        .link(ProductLink {
            marketplace: MarketplaceId::Trendyol,
            remote_sku: "ABC123".into(),
            local_sku: "ABC123".into(),
        })
        .await;
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = Arc::new(ReconcileEngine::new(
        catalog.clone(),
        links,
        ledger.clone(),
        8,
    ));
    (engine, catalog, ledger)
}

#[tokio::test]
async fn same_event_delivered_twice_writes_stock_once() {
    let (engine, catalog, ledger) = setup().await;
    let ev = stock_updated("evt-1", 5);

    assert_eq!(engine.apply(&ev).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(engine.apply(&ev).await.unwrap(), ApplyOutcome::Duplicate);

    assert_eq!(catalog.stock_of("ABC123").await, Some(5));
    assert_eq!(catalog.stock_writes(), 1);
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test]
async fn concurrent_duplicates_apply_once() {
    let (engine, catalog, _) = setup().await;
    let ev = stock_updated("evt-1", 5);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let ev = ev.clone();
        handles.push(tokio::spawn(async move { engine.apply(&ev).await }));
    }
    let mut applied = 0;
    for h in handles {
        if h.await.unwrap().unwrap() == ApplyOutcome::Applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(catalog.stock_writes(), 1);
}

#[tokio::test]
async fn same_id_different_type_is_a_different_event() {
    let (engine, _, ledger) = setup().await;
    engine.apply(&stock_updated("42", 5)).await.unwrap();

    let order = InboundEvent {
        marketplace: MarketplaceId::Trendyol,
        event_type: EventType::OrderCreated,
        external_id: "42".into(),
        payload: json!({"order_id": "42", "lines": [{"sku": "ABC123", "qty": 1, "unit_price": 9.9}]}),
        occurred_at: Utc::now(),
        received_at: Utc::now(),
        processed_at: None,
        synthetic_id: false,
    };
    assert_eq!(engine.apply(&order).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(ledger.len().await, 2);
}
