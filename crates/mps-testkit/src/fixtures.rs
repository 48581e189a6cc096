use chrono::{DateTime, TimeZone, Utc};
use mps_reconcile::MarketplaceProduct;
use mps_schemas::{
    EventType, InboundEvent, MarketplaceId, OrderLine, ProductLink, RemoteOrder, RemoteProduct,
};
use serde_json::json;

/// Fixed clock origin for scenarios: 2026-05-01T09:00:00Z plus `minutes`.
pub fn at(minutes: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).single().unwrap_or_default()
        + chrono::Duration::minutes(i64::from(minutes))
}

/// Single-line order `external_id` for one unit of `sku`.
pub fn order(external_id: &str, sku: &str, created_at: DateTime<Utc>) -> RemoteOrder {
    RemoteOrder {
        external_id: external_id.to_string(),
        order_number: external_id.trim_start_matches(|c: char| !c.is_ascii_digit()).to_string(),
        created_at,
        customer_name: "Ayşe Yılmaz".to_string(),
        total: 25.0,
        currency: "TRY".to_string(),
        lines: vec![OrderLine {
            sku: sku.to_string(),
            qty: 1,
            unit_price: 25.0,
        }],
    }
}

pub fn remote_product(sku: &str) -> RemoteProduct {
    RemoteProduct {
        sku: sku.to_string(),
        remote_id: format!("r-{sku}"),
        title: sku.to_string(),
        qty: 0,
        price: 0.0,
        barcode: None,
    }
}

pub fn link(marketplace: MarketplaceId, remote_sku: &str, local_sku: &str) -> ProductLink {
    ProductLink {
        marketplace,
        remote_sku: remote_sku.to_string(),
        local_sku: local_sku.to_string(),
    }
}

/// Catalog listing flagged dirty so the next pass pushes it.
pub fn dirty_listing(
    marketplace: MarketplaceId,
    remote_sku: &str,
    local_sku: &str,
    qty: i64,
    price: f64,
) -> MarketplaceProduct {
    MarketplaceProduct {
        link: link(marketplace, remote_sku, local_sku),
        qty,
        price,
        dirty: true,
    }
}

pub fn stock_event(
    marketplace: MarketplaceId,
    external_id: &str,
    sku: &str,
    qty: i64,
    occurred_at: DateTime<Utc>,
) -> InboundEvent {
    InboundEvent {
        marketplace,
        event_type: EventType::StockUpdated,
        external_id: external_id.to_string(),
        payload: json!({ "sku": sku, "qty": qty }),
        occurred_at,
        received_at: occurred_at,
        processed_at: None,
        synthetic_id: false,
    }
}

pub fn order_event(marketplace: MarketplaceId, order: &RemoteOrder) -> InboundEvent {
    InboundEvent {
        marketplace,
        event_type: EventType::OrderCreated,
        external_id: order.external_id.clone(),
        payload: json!({
            "order_id": order.external_id,
            "order_number": order.order_number,
            "created_at": order.created_at,
            "customer_name": order.customer_name,
            "total": order.total,
            "currency": order.currency,
            "lines": order.lines,
        }),
        occurred_at: order.created_at,
        received_at: order.created_at,
        processed_at: None,
        synthetic_id: false,
    }
}

/// Webhook body as a marketplace would post it.
pub fn webhook_body(event_type: &str, data: serde_json::Value) -> String {
    json!({ "type": event_type, "data": data }).to_string()
}
