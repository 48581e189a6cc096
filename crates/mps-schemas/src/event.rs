use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MarketplaceId;

/// Inbound event types accepted from marketplaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "stock.updated")]
    StockUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::StockUpdated => "stock.updated",
        }
    }

    /// Exact match on the wire name; returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order.created" => Some(EventType::OrderCreated),
            "stock.updated" => Some(EventType::StockUpdated),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural idempotency key of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub marketplace: MarketplaceId,
    pub external_id: String,
    pub event_type: EventType,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.marketplace, self.event_type, self.external_id)
    }
}

/// An event delivered by a marketplace (webhook or synthesized from a pull).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub marketplace: MarketplaceId,
    pub event_type: EventType,
    pub external_id: String,
    pub payload: serde_json::Value,
    /// Source-side event time. Conflict resolution orders by this, never by
    /// arrival.
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// `external_id` was built from the payload values themselves (no
    /// delivery id, no event time). Such ids recur whenever a value repeats,
    /// so they must not be recorded as processed.
    #[serde(default)]
    pub synthetic_id: bool,
}

impl InboundEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            marketplace: self.marketplace,
            external_id: self.external_id.clone(),
            event_type: self.event_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names() {
        assert_eq!(EventType::parse("order.created"), Some(EventType::OrderCreated));
        assert_eq!(EventType::parse("stock.updated"), Some(EventType::StockUpdated));
        assert_eq!(EventType::parse("Order.Created"), None);
        assert_eq!(
            serde_json::to_string(&EventType::StockUpdated).unwrap(),
            "\"stock.updated\""
        );
    }

    #[test]
    fn key_display_is_stable() {
        let key = EventKey {
            marketplace: MarketplaceId::N11,
            external_id: "ORD-9".to_string(),
            event_type: EventType::OrderCreated,
        };
        assert_eq!(key.to_string(), "n11/order.created/ORD-9");
    }
}
