//! Broadcast Message Types
//!
//! One tagged union for everything that crosses the fan-out plane — the
//! bus topic, the hub, and the SSE wire all speak this type, so producers
//! and consumers share an explicit schema instead of loose maps.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MarketData, OrderBookLevel, OrderResponse, Outcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    /// First frame on every new SSE subscription.
    Connection {
        milestone_id: i64,
        timestamp: i64,
    },
    /// Keep-alive, at most 30 seconds apart.
    Ping {
        timestamp: i64,
    },
    MarketUpdate {
        market: MarketData,
    },
    PriceChange {
        option_id: Outcome,
        old: Decimal,
        new: Decimal,
    },
    Trade {
        trade_id: Uuid,
        option_id: Outcome,
        quantity: i64,
        price: Decimal,
        buyer_id: i64,
        seller_id: i64,
        total_amount: i64,
        timestamp: i64,
    },
    OrderbookUpdate {
        option_id: Outcome,
        buy_orders: Vec<OrderBookLevel>,
        sell_orders: Vec<OrderBookLevel>,
    },
    OrderUpdate {
        order: OrderResponse,
    },
    Error {
        message: String,
    },
}

impl BroadcastMessage {
    pub fn ping() -> Self {
        BroadcastMessage::Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn connection(milestone_id: i64) -> Self {
        BroadcastMessage::Connection {
            milestone_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_frames_are_tagged() {
        let frame = BroadcastMessage::PriceChange {
            option_id: Outcome::Success,
            old: dec!(0.50),
            new: dec!(0.70),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "price_change");
        assert_eq!(json["option_id"], "success");
    }

    #[test]
    fn test_trade_frame_round_trip() {
        let frame = BroadcastMessage::Trade {
            trade_id: Uuid::new_v4(),
            option_id: Outcome::Fail,
            quantity: 30,
            price: dec!(0.70),
            buyer_id: 2,
            seller_id: 1,
            total_amount: 2100,
            timestamp: 1,
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: BroadcastMessage = serde_json::from_str(&json).unwrap();
        match back {
            BroadcastMessage::Trade { total_amount, .. } => assert_eq!(total_amount, 2100),
            _ => panic!("wrong variant"),
        }
    }
}
