//! Matching Engine Types

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::{Order, OrderSide, OrderStatus};

// ============================================================================
// Price Tick
// ============================================================================

/// Book-level price key: whole ticks of 0.01 probability (1..=99).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceTick(i64);

impl PriceTick {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::ONE_HUNDRED).trunc();
        PriceTick(scaled.to_i64().unwrap_or(0))
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl Ord for PriceTick {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceTick {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Book Order
// ============================================================================

/// An order as the book sees it. The durable row stays in the store; the
/// book carries only what matching needs.
#[derive(Debug, Clone)]
pub struct BookOrder {
    pub id: Uuid,
    pub user_id: i64,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: i64,
    pub remaining: i64,
    /// Millisecond timestamp; with the id it forms the deterministic FIFO
    /// key that survives restarts.
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

impl BookOrder {
    pub fn filled(&self) -> i64 {
        self.quantity - self.remaining
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }

    /// Engine-visible status of this order given its remaining quantity.
    pub fn status(&self) -> OrderStatus {
        if self.remaining == 0 {
            OrderStatus::Filled
        } else if self.remaining < self.quantity {
            OrderStatus::Partial
        } else {
            OrderStatus::Pending
        }
    }
}

impl From<&Order> for BookOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            remaining: order.remaining,
            created_at_ms: order.created_at.timestamp_millis(),
            expires_at_ms: order.expires_at.map(|at| at.timestamp_millis()),
        }
    }
}

// ============================================================================
// Fills and Match Result
// ============================================================================

/// One crossing between a taker and a resting maker, priced at the maker's
/// limit. Buyer/seller are resolved from the sides so the command handler
/// can write the trade row directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub trade_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_order_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub quantity: i64,
    pub price: Decimal,
    pub maker_remaining: i64,
    pub timestamp_ms: i64,
}

/// Result of submitting one order to its market's book.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub filled: i64,
    pub remaining: i64,
    pub fills: Vec<Fill>,
    /// True when the residual rested on the book at its own price.
    pub rested: bool,
}

impl MatchResult {
    pub fn average_price(&self) -> Option<Decimal> {
        if self.filled == 0 {
            return None;
        }
        let notional: Decimal = self
            .fills
            .iter()
            .map(|f| f.price * Decimal::from(f.quantity))
            .sum();
        Some(notional / Decimal::from(self.filled))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Market not open on this instance: {0}")]
    MarketNotOpen(String),

    #[error("Market is frozen: {0}")]
    MarketFrozen(String),

    #[error("Engine queue full for market {0}")]
    QueueFull(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Engine worker for market {0} has stopped")]
    WorkerGone(String),
}

/// Helper for stamping fills and snapshots.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_tick_conversion() {
        let tick = PriceTick::from_decimal(dec!(0.70));
        assert_eq!(tick.raw(), 70);
        assert_eq!(tick.to_decimal(), dec!(0.70));
    }

    #[test]
    fn test_price_tick_ordering() {
        assert!(PriceTick::from_decimal(dec!(0.01)) < PriceTick::from_decimal(dec!(0.99)));
    }

    #[test]
    fn test_book_order_status() {
        let mut order = BookOrder {
            id: Uuid::new_v4(),
            user_id: 1,
            side: OrderSide::Buy,
            price: dec!(0.50),
            quantity: 10,
            remaining: 10,
            created_at_ms: 0,
            expires_at_ms: None,
        };
        assert_eq!(order.status(), OrderStatus::Pending);
        order.remaining = 4;
        assert_eq!(order.status(), OrderStatus::Partial);
        assert_eq!(order.filled(), 6);
        order.remaining = 0;
        assert_eq!(order.status(), OrderStatus::Filled);
    }

    #[test]
    fn test_average_price() {
        let fill = |price: Decimal, quantity: i64| Fill {
            trade_id: Uuid::new_v4(),
            taker_order_id: Uuid::new_v4(),
            maker_order_id: Uuid::new_v4(),
            buy_order_id: Uuid::new_v4(),
            sell_order_id: Uuid::new_v4(),
            buyer_id: 1,
            seller_id: 2,
            quantity,
            price,
            maker_remaining: 0,
            timestamp_ms: 0,
        };
        let result = MatchResult {
            order_id: Uuid::new_v4(),
            status: OrderStatus::Filled,
            filled: 30,
            remaining: 0,
            fills: vec![fill(dec!(0.60), 10), fill(dec!(0.75), 20)],
            rested: false,
        };
        assert_eq!(result.average_price(), Some(dec!(0.70)));
    }
}
