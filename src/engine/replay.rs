//! Event-Log Replay
//!
//! Rebuilds a market's book from its append-only event log. Replay is
//! idempotent: events are deduped by id and versions at or below the
//! starting point are skipped, so a log applied twice (or a tail applied
//! over a snapshot) converges to the same book.

use std::collections::HashSet;
use uuid::Uuid;

use super::book::OrderBook;
use super::types::BookOrder;
use crate::models::{EventPayload, MarketKey, OrderEvent, OrderEventKind};

pub struct Replayer {
    seen: HashSet<Uuid>,
    last_applied_version: i64,
}

impl Replayer {
    pub fn new(last_applied_version: i64) -> Self {
        Self {
            seen: HashSet::new(),
            last_applied_version,
        }
    }

    pub fn last_applied_version(&self) -> i64 {
        self.last_applied_version
    }

    /// Apply one event to the book. Returns false when the event was a
    /// duplicate or older than the replay start.
    pub fn apply(&mut self, book: &mut OrderBook, event: &OrderEvent) -> bool {
        if event.version <= self.last_applied_version {
            return false;
        }
        if !self.seen.insert(event.event_id) {
            return false;
        }
        self.last_applied_version = event.version;

        match event.kind {
            OrderEventKind::Created => {
                let Some(order_id) = event.order_id else {
                    return false;
                };
                if book.has_order(&order_id) {
                    return false;
                }
                if let Ok(EventPayload::OrderCreated {
                    user_id,
                    side,
                    price,
                    quantity,
                    created_at_ms,
                    expires_at_ms,
                }) = serde_json::from_value(event.payload.clone())
                {
                    book.insert_resting(BookOrder {
                        id: order_id,
                        user_id,
                        side,
                        price,
                        quantity,
                        remaining: quantity,
                        created_at_ms,
                        expires_at_ms,
                    });
                }
            }
            OrderEventKind::Matched => {
                if let Ok(EventPayload::OrderMatched {
                    taker_order_id,
                    maker_order_id,
                    quantity,
                    ..
                }) = serde_json::from_value(event.payload.clone())
                {
                    book.reduce(maker_order_id, quantity);
                    book.reduce(taker_order_id, quantity);
                }
            }
            OrderEventKind::Cancelled | OrderEventKind::Filled => {
                if let Some(order_id) = event.order_id {
                    book.cancel(order_id);
                }
            }
            OrderEventKind::Frozen => {
                book.drain_all();
            }
            // Price ticks carry no book state.
            OrderEventKind::Priced => {}
        }

        true
    }

    /// Replay a whole log slice against an empty book.
    pub fn rebuild(market: MarketKey, events: &[OrderEvent]) -> OrderBook {
        let mut book = OrderBook::new(market);
        let mut replayer = Replayer::new(0);
        for event in events {
            replayer.apply(&mut book, event);
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, Outcome};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn market() -> MarketKey {
        MarketKey::new(42, Outcome::Success)
    }

    fn event(
        version: i64,
        kind: OrderEventKind,
        order_id: Option<Uuid>,
        payload: EventPayload,
    ) -> OrderEvent {
        OrderEvent {
            event_id: OrderEvent::new_id(),
            milestone_id: 42,
            option: Outcome::Success,
            version,
            kind,
            order_id,
            trade_id: None,
            payload: serde_json::to_value(&payload).unwrap(),
            server_id: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn created(version: i64, order_id: Uuid, side: OrderSide, price: rust_decimal::Decimal, qty: i64) -> OrderEvent {
        event(
            version,
            OrderEventKind::Created,
            Some(order_id),
            EventPayload::OrderCreated {
                user_id: version,
                side,
                price,
                quantity: qty,
                created_at_ms: version,
                expires_at_ms: None,
            },
        )
    }

    #[test]
    fn test_rebuild_from_log() {
        let sell_id = Uuid::new_v4();
        let buy_id = Uuid::new_v4();
        let events = vec![
            created(1, sell_id, OrderSide::Sell, dec!(0.70), 50),
            created(2, buy_id, OrderSide::Buy, dec!(0.70), 30),
            event(
                3,
                OrderEventKind::Matched,
                None,
                EventPayload::OrderMatched {
                    taker_order_id: buy_id,
                    maker_order_id: sell_id,
                    quantity: 30,
                    price: dec!(0.70),
                    total_cents: 2100,
                },
            ),
        ];

        let book = Replayer::rebuild(market(), &events);

        // Seller's residual survives; the filled taker is gone.
        assert_eq!(book.order_count(), 1);
        assert_eq!(book.get_order(&sell_id).unwrap().remaining, 20);
        assert!(!book.has_order(&buy_id));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_replay_is_idempotent() {
        let order_id = Uuid::new_v4();
        let log = vec![created(1, order_id, OrderSide::Buy, dec!(0.40), 10)];

        let mut book = OrderBook::new(market());
        let mut replayer = Replayer::new(0);
        assert!(replayer.apply(&mut book, &log[0]));
        // Same event again: deduped, book unchanged.
        assert!(!replayer.apply(&mut book, &log[0]));
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_replay_skips_already_applied_versions() {
        let order_id = Uuid::new_v4();
        let e = created(5, order_id, OrderSide::Buy, dec!(0.40), 10);

        let mut book = OrderBook::new(market());
        let mut replayer = Replayer::new(5);
        assert!(!replayer.apply(&mut book, &e));
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn test_replay_matches_live_book() {
        // The round-trip property: a book built by live submissions equals
        // one rebuilt from the events those submissions emitted.
        let mut live = OrderBook::new(market());
        let sell = BookOrder {
            id: Uuid::new_v4(),
            user_id: 1,
            side: OrderSide::Sell,
            price: dec!(0.70),
            quantity: 50,
            remaining: 50,
            created_at_ms: 1,
            expires_at_ms: None,
        };
        let buy = BookOrder {
            id: Uuid::new_v4(),
            user_id: 2,
            side: OrderSide::Buy,
            price: dec!(0.75),
            quantity: 30,
            remaining: 30,
            created_at_ms: 2,
            expires_at_ms: None,
        };

        let mut events = vec![created(1, sell.id, OrderSide::Sell, dec!(0.70), 50)];
        live.submit(sell.clone());
        events.push(created(2, buy.id, OrderSide::Buy, dec!(0.75), 30));
        let result = live.submit(buy.clone());
        for fill in &result.fills {
            events.push(event(
                3,
                OrderEventKind::Matched,
                None,
                EventPayload::OrderMatched {
                    taker_order_id: fill.taker_order_id,
                    maker_order_id: fill.maker_order_id,
                    quantity: fill.quantity,
                    price: fill.price,
                    total_cents: 2100,
                },
            ));
        }

        let rebuilt = Replayer::rebuild(market(), &events);
        assert_eq!(rebuilt.order_count(), live.order_count());
        assert_eq!(
            rebuilt.snapshot(10).bids,
            live.snapshot(10).bids
        );
        assert_eq!(rebuilt.snapshot(10).asks, live.snapshot(10).asks);
    }
}
