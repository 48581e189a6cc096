//! Webhook body → [`InboundEvent`].
//!
//! Body shape: `{ "type": ..., "data": {...}, "id"?: ..., "occurred_at"?: RFC3339 }`.
//!
//! # Contract
//! - `type` and `data` (an object) are required; anything else malformed is
//!   `PermanentValidation`.
//! - A `type` outside the known set is `UnknownEventType`, checked before
//!   `data` is validated.
//! - External id: `id` when supplied, else derived from `data`
//!   (`order.created` → order id, `stock.updated` → `sku@occurred_at`, or
//!   `sku:qty` without a timestamp).
//! - A `sku:qty` id is marked [`InboundEvent::synthetic_id`]: it repeats
//!   whenever a quantity repeats, so it never enters the processed ledger.

use chrono::{DateTime, Utc};
use mps_reconcile::payload;
use mps_schemas::{EventType, InboundEvent, MarketplaceId, SyncError};
use serde_json::Value;

fn field<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body.get(name).filter(|v| !v.is_null())
}

/// Parse and validate a raw webhook body.
pub fn parse_event(
    marketplace: MarketplaceId,
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<InboundEvent, SyncError> {
    let body: Value = serde_json::from_slice(body)
        .map_err(|e| SyncError::permanent(format!("malformed JSON: {e}")).with_marketplace(marketplace))?;
    if !body.is_object() {
        return Err(SyncError::permanent("webhook body must be a JSON object").with_marketplace(marketplace));
    }

    let type_str = field(&body, "type")
        .ok_or_else(|| SyncError::permanent("missing field: type"))?
        .as_str()
        .ok_or_else(|| SyncError::permanent("field type must be a string"))?;
    let event_type = EventType::parse(type_str)
        .ok_or_else(|| SyncError::unknown_event_type(type_str).with_marketplace(marketplace))?;

    let data = field(&body, "data")
        .ok_or_else(|| SyncError::permanent("missing field: data"))?;
    if !data.is_object() {
        return Err(SyncError::permanent("field data must be an object").with_marketplace(marketplace));
    }

    let occurred_at = match field(&body, "occurred_at") {
        None => None,
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| SyncError::permanent("occurred_at must be an RFC3339 string"))?;
            let at = DateTime::parse_from_rfc3339(s)
                .map_err(|e| SyncError::permanent(format!("occurred_at not RFC3339: {e}")))?;
            Some(at.with_timezone(&Utc))
        }
    };

    let (derived, from_values) = match event_type {
        EventType::OrderCreated => (
            payload::parse_order(data, occurred_at.unwrap_or(received_at))?.external_id,
            false,
        ),
        EventType::StockUpdated => {
            let stock = payload::parse_stock(data)?;
            match occurred_at {
                Some(at) => (format!("{}@{}", stock.sku, at.to_rfc3339()), false),
                None => (format!("{}:{}", stock.sku, stock.qty), true),
            }
        }
    };
    let (external_id, synthetic_id) = match field(&body, "id").and_then(payload::id_string) {
        Some(id) => (id, false),
        None => (derived, from_values),
    };

    Ok(InboundEvent {
        marketplace,
        event_type,
        external_id,
        payload: data.clone(),
        occurred_at: occurred_at.unwrap_or(received_at),
        received_at,
        processed_at: None,
        synthetic_id,
    })
}
