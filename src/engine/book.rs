//! Per-Market Order Book
//!
//! Two price-time-priority queues: bids matched highest-first, asks
//! lowest-first, FIFO within a level. The book is only ever touched from
//! its market's serial queue, so it is plain single-threaded state; the
//! engine manager provides the concurrency boundary.

use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

use super::types::{now_ms, BookOrder, Fill, MatchResult, PriceTick};
use crate::models::{MarketKey, OrderBookLevel, OrderBookView, OrderSide};

pub struct OrderBook {
    market: MarketKey,

    /// Bids keyed by tick; iterate in reverse for best (highest) first.
    bids: BTreeMap<PriceTick, VecDeque<BookOrder>>,
    /// Asks keyed by tick; iterate forward for best (lowest) first.
    asks: BTreeMap<PriceTick, VecDeque<BookOrder>>,

    /// Order id to (side, tick) for O(1) cancellation.
    index: HashMap<Uuid, (OrderSide, PriceTick)>,
}

impl OrderBook {
    pub fn new(market: MarketKey) -> Self {
        Self {
            market,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn market(&self) -> &MarketKey {
        &self.market
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn has_order(&self, order_id: &Uuid) -> bool {
        self.index.contains_key(order_id)
    }

    pub fn get_order(&self, order_id: &Uuid) -> Option<&BookOrder> {
        let (side, tick) = self.index.get(order_id)?;
        let levels = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        levels.get(tick)?.iter().find(|o| o.id == *order_id)
    }

    pub fn best_bid(&self) -> Option<PriceTick> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<PriceTick> {
        self.asks.keys().next().copied()
    }

    // ========================================================================
    // Submit / match
    // ========================================================================

    /// Match a taker against the opposite side, then rest any residual at
    /// its own price. Every fill executes at the resting order's price.
    pub fn submit(&mut self, mut taker: BookOrder) -> MatchResult {
        let order_id = taker.id;
        let fills = self.match_against_book(&mut taker);

        let rested = if taker.remaining > 0 {
            self.insert_resting(taker.clone());
            true
        } else {
            false
        };

        MatchResult {
            order_id,
            status: taker.status(),
            filled: taker.filled(),
            remaining: taker.remaining,
            fills,
            rested,
        }
    }

    fn match_against_book(&mut self, taker: &mut BookOrder) -> Vec<Fill> {
        let mut fills = Vec::new();
        let taker_tick = PriceTick::from_decimal(taker.price);
        let timestamp = now_ms();

        loop {
            if taker.remaining == 0 {
                break;
            }

            // Best opposite level that still crosses the taker's limit.
            let maker_tick = match taker.side {
                OrderSide::Buy => match self.best_ask() {
                    Some(tick) if tick <= taker_tick => tick,
                    _ => break,
                },
                OrderSide::Sell => match self.best_bid() {
                    Some(tick) if tick >= taker_tick => tick,
                    _ => break,
                },
            };

            let levels = match taker.side {
                OrderSide::Buy => &mut self.asks,
                OrderSide::Sell => &mut self.bids,
            };
            let Some(queue) = levels.get_mut(&maker_tick) else {
                break;
            };

            while taker.remaining > 0 {
                let Some(maker) = queue.front_mut() else {
                    break;
                };

                let quantity = taker.remaining.min(maker.remaining);
                maker.remaining -= quantity;
                let maker_remaining = maker.remaining;
                let maker_id = maker.id;
                let maker_user = maker.user_id;
                let maker_price = maker.price;

                let (buy_order_id, sell_order_id, buyer_id, seller_id) = match taker.side {
                    OrderSide::Buy => (taker.id, maker_id, taker.user_id, maker_user),
                    OrderSide::Sell => (maker_id, taker.id, maker_user, taker.user_id),
                };

                fills.push(Fill {
                    trade_id: Uuid::new_v4(),
                    taker_order_id: taker.id,
                    maker_order_id: maker_id,
                    buy_order_id,
                    sell_order_id,
                    buyer_id,
                    seller_id,
                    quantity,
                    price: maker_price,
                    maker_remaining,
                    timestamp_ms: timestamp,
                });

                taker.remaining -= quantity;

                if maker_remaining == 0 {
                    queue.pop_front();
                    self.index.remove(&maker_id);
                }
            }

            if queue.is_empty() {
                levels.remove(&maker_tick);
            }
        }

        fills
    }

    /// Rest an order on the book at its own price.
    pub fn insert_resting(&mut self, order: BookOrder) {
        let tick = PriceTick::from_decimal(order.price);
        let side = order.side;
        let id = order.id;

        let levels = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        levels.entry(tick).or_default().push_back(order);
        self.index.insert(id, (side, tick));
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Remove a resting order. Idempotent: a second cancel finds nothing.
    pub fn cancel(&mut self, order_id: Uuid) -> Option<BookOrder> {
        let (side, tick) = self.index.remove(&order_id)?;

        let levels = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        let queue = levels.get_mut(&tick)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&tick);
        }
        order
    }

    /// Reduce a resting order's remaining quantity in place, removing it
    /// when it reaches zero. Used by event replay.
    pub fn reduce(&mut self, order_id: Uuid, by: i64) -> bool {
        let Some((side, tick)) = self.index.get(&order_id).copied() else {
            return false;
        };
        let levels = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        let Some(queue) = levels.get_mut(&tick) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|o| o.id == order_id) else {
            return false;
        };

        let order = &mut queue[pos];
        order.remaining = (order.remaining - by).max(0);
        if order.remaining == 0 {
            queue.remove(pos);
            self.index.remove(&order_id);
            if queue.is_empty() {
                levels.remove(&tick);
            }
        }
        true
    }

    /// Remove every resting order (market freeze). Returns them for
    /// refund accounting; a second call returns nothing.
    pub fn drain_all(&mut self) -> Vec<BookOrder> {
        let mut drained: Vec<BookOrder> = Vec::with_capacity(self.index.len());
        for (_, queue) in std::mem::take(&mut self.bids) {
            drained.extend(queue);
        }
        for (_, queue) in std::mem::take(&mut self.asks) {
            drained.extend(queue);
        }
        self.index.clear();
        drained
    }

    /// Remove resting orders whose expiry has passed.
    pub fn remove_expired(&mut self, now_ms: i64) -> Vec<BookOrder> {
        let expired_ids: Vec<Uuid> = self
            .index
            .iter()
            .filter_map(|(id, (side, tick))| {
                let levels = match side {
                    OrderSide::Buy => &self.bids,
                    OrderSide::Sell => &self.asks,
                };
                levels
                    .get(tick)?
                    .iter()
                    .find(|o| o.id == *id && o.is_expired_at(now_ms))
                    .map(|o| o.id)
            })
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| self.cancel(id))
            .collect()
    }

    // ========================================================================
    // Views / recovery
    // ========================================================================

    /// Aggregate resting orders into top-`depth` price levels per side.
    pub fn snapshot(&self, depth: usize) -> OrderBookView {
        let aggregate = |queue: &VecDeque<BookOrder>, tick: &PriceTick| OrderBookLevel {
            price: tick.to_decimal(),
            quantity: queue.iter().map(|o| o.remaining).sum(),
            order_count: queue.len(),
        };

        let bids = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(tick, queue)| aggregate(queue, tick))
            .collect();

        let asks = self
            .asks
            .iter()
            .take(depth)
            .map(|(tick, queue)| aggregate(queue, tick))
            .collect();

        OrderBookView {
            milestone_id: self.market.milestone_id,
            option: self.market.option,
            bids,
            asks,
            timestamp: now_ms(),
        }
    }

    /// One-shot recovery from persisted open orders. Sorting by
    /// `(price, created_at, id)` makes FIFO within each level identical
    /// across restarts regardless of scan order.
    pub fn load(&mut self, mut orders: Vec<BookOrder>) {
        self.bids.clear();
        self.asks.clear();
        self.index.clear();

        orders.sort_by(|a, b| {
            PriceTick::from_decimal(a.price)
                .cmp(&PriceTick::from_decimal(b.price))
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then(a.id.cmp(&b.id))
        });

        for order in orders {
            if order.remaining > 0 {
                self.insert_resting(order);
            }
        }
    }

    /// Invariant check used by tests and the replay path: no resting bid
    /// may price at or above any resting ask.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn market() -> MarketKey {
        MarketKey::new(42, Outcome::Success)
    }

    fn order(user_id: i64, side: OrderSide, price: Decimal, quantity: i64) -> BookOrder {
        order_at(user_id, side, price, quantity, now_ms())
    }

    fn order_at(
        user_id: i64,
        side: OrderSide,
        price: Decimal,
        quantity: i64,
        created_at_ms: i64,
    ) -> BookOrder {
        BookOrder {
            id: Uuid::new_v4(),
            user_id,
            side,
            price,
            quantity,
            remaining: quantity,
            created_at_ms,
            expires_at_ms: None,
        }
    }

    #[test]
    fn test_add_and_cancel() {
        let mut book = OrderBook::new(market());
        let o = order(1, OrderSide::Buy, dec!(0.50), 10);
        let id = o.id;

        let result = book.submit(o);
        assert!(result.rested);
        assert_eq!(book.order_count(), 1);

        let cancelled = book.cancel(id);
        assert!(cancelled.is_some());
        assert_eq!(book.order_count(), 0);

        // Idempotent: second cancel is a no-op.
        assert!(book.cancel(id).is_none());
    }

    #[test]
    fn test_no_cross_rests_both_sides() {
        let mut book = OrderBook::new(market());
        book.submit(order(1, OrderSide::Buy, dec!(0.74), 100));
        let result = book.submit(order(2, OrderSide::Sell, dec!(0.76), 75));

        assert!(result.fills.is_empty());
        assert!(result.rested);
        assert_eq!(book.best_bid(), Some(PriceTick::from_decimal(dec!(0.74))));
        assert_eq!(book.best_ask(), Some(PriceTick::from_decimal(dec!(0.76))));
        assert!(!book.is_crossed());

        let view = book.snapshot(10);
        assert_eq!(view.spread(), Some(dec!(0.02)));
        assert_eq!(view.bids[0].quantity, 100);
        assert_eq!(view.asks[0].quantity, 75);
    }

    #[test]
    fn test_cross_executes_at_maker_price() {
        let mut book = OrderBook::new(market());
        let sell = order(1, OrderSide::Sell, dec!(0.70), 50);
        let sell_id = sell.id;
        book.submit(sell);

        let result = book.submit(order(2, OrderSide::Buy, dec!(0.75), 30));

        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].price, dec!(0.70));
        assert_eq!(result.fills[0].quantity, 30);
        assert_eq!(result.fills[0].buyer_id, 2);
        assert_eq!(result.fills[0].seller_id, 1);
        assert_eq!(result.filled, 30);
        assert_eq!(result.remaining, 0);
        assert!(!result.rested);

        // Maker keeps its residual on the book.
        let resting = book.get_order(&sell_id).unwrap();
        assert_eq!(resting.remaining, 20);
    }

    #[test]
    fn test_fifo_at_equal_price() {
        let mut book = OrderBook::new(market());
        let base = now_ms();
        let a = order_at(1, OrderSide::Sell, dec!(0.70), 40, base);
        let b = order_at(2, OrderSide::Sell, dec!(0.70), 40, base + 1);
        let (a_id, b_id) = (a.id, b.id);
        book.submit(a);
        book.submit(b);

        let result = book.submit(order(3, OrderSide::Buy, dec!(0.70), 60));

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].maker_order_id, a_id);
        assert_eq!(result.fills[0].quantity, 40);
        assert_eq!(result.fills[1].maker_order_id, b_id);
        assert_eq!(result.fills[1].quantity, 20);

        assert!(!book.has_order(&a_id));
        assert_eq!(book.get_order(&b_id).unwrap().remaining, 20);
    }

    #[test]
    fn test_taker_walks_multiple_levels() {
        let mut book = OrderBook::new(market());
        book.submit(order(1, OrderSide::Sell, dec!(0.60), 10));
        book.submit(order(2, OrderSide::Sell, dec!(0.65), 10));
        book.submit(order(3, OrderSide::Sell, dec!(0.80), 10));

        let result = book.submit(order(4, OrderSide::Buy, dec!(0.70), 25));

        // Fills the 0.60 and 0.65 levels, never the 0.80 one; residual
        // rests as the new best bid.
        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].price, dec!(0.60));
        assert_eq!(result.fills[1].price, dec!(0.65));
        assert_eq!(result.filled, 20);
        assert_eq!(result.remaining, 5);
        assert!(result.rested);
        assert_eq!(book.best_bid(), Some(PriceTick::from_decimal(dec!(0.70))));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_self_trade_is_allowed() {
        let mut book = OrderBook::new(market());
        book.submit(order(7, OrderSide::Sell, dec!(0.50), 10));
        let result = book.submit(order(7, OrderSide::Buy, dec!(0.50), 10));

        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].buyer_id, 7);
        assert_eq!(result.fills[0].seller_id, 7);
    }

    #[test]
    fn test_load_is_deterministic() {
        let base = now_ms();
        let mut orders = vec![
            order_at(1, OrderSide::Sell, dec!(0.70), 10, base + 2),
            order_at(2, OrderSide::Sell, dec!(0.70), 20, base),
            order_at(3, OrderSide::Sell, dec!(0.70), 30, base + 1),
        ];
        let first_in_line = orders[1].id;

        // Load in shuffled insertion order; FIFO must come out by created_at.
        orders.reverse();
        let mut book = OrderBook::new(market());
        book.load(orders);

        let result = book.submit(order(9, OrderSide::Buy, dec!(0.70), 5));
        assert_eq!(result.fills[0].maker_order_id, first_in_line);
    }

    #[test]
    fn test_drain_all_is_idempotent() {
        let mut book = OrderBook::new(market());
        book.submit(order(1, OrderSide::Buy, dec!(0.40), 10));
        book.submit(order(2, OrderSide::Sell, dec!(0.60), 10));

        let drained = book.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(book.order_count(), 0);
        assert!(book.drain_all().is_empty());
    }

    #[test]
    fn test_remove_expired() {
        let mut book = OrderBook::new(market());
        let now = now_ms();
        let mut stale = order(1, OrderSide::Buy, dec!(0.30), 5);
        stale.expires_at_ms = Some(now - 1);
        let fresh = order(2, OrderSide::Buy, dec!(0.30), 5);
        book.insert_resting(stale);
        book.insert_resting(fresh);

        let expired = book.remove_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(book.order_count(), 1);
    }
}
