//! Order Event Log Models
//!
//! Append-only, per-market events with a server-assigned monotonic version.
//! Events are idempotent by `event_id`; consumers dedupe on replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::market::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_event_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderEventKind {
    Created,
    Matched,
    Cancelled,
    Filled,
    Priced,
    Frozen,
}

impl fmt::Display for OrderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderEventKind::Created => "created",
            OrderEventKind::Matched => "matched",
            OrderEventKind::Cancelled => "cancelled",
            OrderEventKind::Filled => "filled",
            OrderEventKind::Priced => "priced",
            OrderEventKind::Frozen => "frozen",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderEvent {
    /// Time-sortable unique id (UUIDv7); the dedupe key for consumers.
    pub event_id: Uuid,
    pub milestone_id: i64,
    #[sqlx(rename = "option_id")]
    #[serde(rename = "option_id")]
    pub option: Outcome,
    /// Per-market strictly monotonic, gap-free sequence number.
    pub version: i64,
    pub kind: OrderEventKind,
    pub order_id: Option<Uuid>,
    pub trade_id: Option<Uuid>,
    pub payload: serde_json::Value,
    /// Instance that appended the event (the lock holder at the time).
    pub server_id: String,
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new_id() -> Uuid {
        Uuid::now_v7()
    }
}

/// Typed payloads carried inside `OrderEvent.payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    OrderCreated {
        user_id: i64,
        side: super::order::OrderSide,
        price: rust_decimal::Decimal,
        quantity: i64,
        created_at_ms: i64,
        expires_at_ms: Option<i64>,
    },
    OrderMatched {
        taker_order_id: Uuid,
        maker_order_id: Uuid,
        quantity: i64,
        price: rust_decimal::Decimal,
        total_cents: i64,
    },
    OrderCancelled {
        refund_cents: i64,
    },
    OrderFilled,
    Priced {
        old_price: rust_decimal::Decimal,
        new_price: rust_decimal::Decimal,
    },
    MarketFrozen {
        cancelled_orders: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_time_sortable() {
        let a = OrderEvent::new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = OrderEvent::new_id();
        // v7 ids embed a millisecond timestamp prefix, so an id minted in
        // a later millisecond always sorts after an earlier one.
        assert!(a < b);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = EventPayload::OrderMatched {
            taker_order_id: Uuid::new_v4(),
            maker_order_id: Uuid::new_v4(),
            quantity: 30,
            price: rust_decimal_macros::dec!(0.70),
            total_cents: 2100,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "order_matched");
        let back: EventPayload = serde_json::from_value(json).unwrap();
        match back {
            EventPayload::OrderMatched { quantity, .. } => assert_eq!(quantity, 30),
            _ => panic!("wrong variant"),
        }
    }
}
