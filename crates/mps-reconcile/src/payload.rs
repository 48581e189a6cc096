//! Typed views over inbound event payloads.
//!
//! Webhook `data` objects and orders synthesized from a pull share one
//! reader, so both paths go through the same validation.

use chrono::{DateTime, Utc};
use mps_schemas::{OrderLine, RemoteOrder, SyncError};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct OrderData {
    #[serde(default, alias = "id", alias = "external_id")]
    order_id: Option<Value>,
    #[serde(default)]
    order_number: Option<Value>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    total: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    lines: Vec<OrderLine>,
}

/// Ids arrive as strings or numbers depending on the marketplace.
pub fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Order id carried by an `order.created` payload, if any.
pub fn order_id_of(data: &Value) -> Option<String> {
    ["order_id", "id", "external_id"]
        .iter()
        .find_map(|k| data.get(*k).and_then(id_string))
}

/// Read an order out of `data`. `fallback_at` stands in for a missing
/// `created_at`.
pub fn parse_order(data: &Value, fallback_at: DateTime<Utc>) -> Result<RemoteOrder, SyncError> {
    let parsed: OrderData = serde_json::from_value(data.clone())
        .map_err(|e| SyncError::permanent(format!("invalid order payload: {e}")))?;
    let external_id = parsed
        .order_id
        .as_ref()
        .and_then(id_string)
        .ok_or_else(|| SyncError::permanent("order payload requires data.order_id or data.id"))?;
    let order_number = parsed
        .order_number
        .as_ref()
        .and_then(id_string)
        .unwrap_or_else(|| external_id.clone());
    let total = parsed.total.unwrap_or_else(|| {
        parsed
            .lines
            .iter()
            .map(|l| l.unit_price * l.qty as f64)
            .sum()
    });
    Ok(RemoteOrder {
        external_id,
        order_number,
        created_at: parsed.created_at.unwrap_or(fallback_at),
        customer_name: parsed.customer_name.unwrap_or_default(),
        total,
        currency: parsed.currency.unwrap_or_else(|| "TRY".to_string()),
        lines: parsed.lines,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockData {
    pub sku: String,
    pub qty: i64,
}

/// `data.sku` (non-empty string) and `data.qty` (non-negative integer).
pub fn parse_stock(data: &Value) -> Result<StockData, SyncError> {
    let sku = data
        .get("sku")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::permanent("stock payload requires data.sku"))?;
    let qty = data
        .get("qty")
        .and_then(Value::as_i64)
        .ok_or_else(|| SyncError::permanent("stock payload requires integer data.qty"))?;
    if qty < 0 {
        return Err(SyncError::permanent(format!("data.qty must be >= 0, got {qty}")).with_entity(sku));
    }
    Ok(StockData {
        sku: sku.to_string(),
        qty,
    })
}
