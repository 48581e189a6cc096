use std::sync::Arc;

use chrono::{Duration, Utc};
use mps_reconcile::*;
use mps_schemas::{ErrorKind, MarketplaceId, OrderLine, RemoteOrder};

fn order(id: &str, minutes: i64, qty: i64) -> RemoteOrder {
    RemoteOrder {
        external_id: id.into(),
        order_number: id.into(),
        created_at: Utc::now() - Duration::minutes(60 - minutes),
        customer_name: "Zeynep".into(),
        total: 10.0 * qty as f64,
        currency: "TRY".into(),
        lines: vec![OrderLine {
            sku: "ABC123".into(),
            qty,
            unit_price: 10.0,
        }],
    }
}

#[tokio::test]
async fn failure_on_fourth_order_leaves_later_orders_unattempted() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let engine = ReconcileEngine::new(
        catalog.clone(),
        Arc::new(InMemoryProductLinks::new()),
        Arc::new(InMemoryLedger::new()),
        4,
    )
    .with_account(MarketplaceId::N11, "n11-store");

    // The catalog refuses a non-positive line quantity.
    let batch = vec![
        order("N-1", 1, 1),
        order("N-2", 2, 1),
        order("N-3", 3, 2),
        order("N-4", 4, 0),
        order("N-5", 5, 1),
    ];
    let report = engine.import_orders(MarketplaceId::N11, &batch).await;

    assert_eq!(report.imported, 3);
    let failure = report.failure.expect("fourth order fails");
    assert_eq!(failure.kind, ErrorKind::Internal);
    assert_eq!(failure.context.entity_id.as_deref(), Some("N-4"));
    assert_eq!(catalog.orders().await.len(), 3);
    assert_eq!(engine.order_state(MarketplaceId::N11, "N-5"), None);

    // Re-running the same batch imports nothing twice.
    let again = engine.import_orders(MarketplaceId::N11, &batch[..3]).await;
    assert_eq!(again.imported, 0);
    assert_eq!(again.duplicates, 3);
    assert!(catalog
        .orders()
        .await
        .iter()
        .all(|o| o.ctx.account_id == "n11-store"));
}
