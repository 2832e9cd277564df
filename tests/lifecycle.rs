//! End-to-end matching scenarios against the live engine manager:
//! the exchange's contractual behaviors, driven through the per-market
//! serial queue exactly as the command handler drives them.

mod common;

use common::*;
use rust_decimal_macros::dec;

use blueprint_exchange::engine::{EngineManager, OrderBook};
use blueprint_exchange::models::{
    side_fee_cents, trade_total_cents, OrderSide, OrderStatus,
};

fn open_engine() -> EngineManager {
    let (manager, _failures) = EngineManager::new(256);
    manager.open_market(OrderBook::new(market()));
    manager
}

#[tokio::test]
async fn test_simple_cross_executes_at_maker_price() {
    let engine = open_engine();

    let sell = make_order(1, OrderSide::Sell, dec!(0.70), 50);
    let rest = engine.submit(&market(), sell).await.unwrap();
    assert_eq!(rest.status, OrderStatus::Pending);
    assert!(rest.rested);

    let buy = make_order(2, OrderSide::Buy, dec!(0.75), 30);
    let result = engine.submit(&market(), buy).await.unwrap();

    assert_eq!(result.fills.len(), 1);
    let fill = &result.fills[0];
    assert_eq!(fill.quantity, 30);
    assert_eq!(fill.price, dec!(0.70));
    assert_eq!(trade_total_cents(fill.quantity, fill.price), 2100);

    // Buyer is filled; seller keeps a partial on the book.
    assert_eq!(result.status, OrderStatus::Filled);
    assert_eq!(result.filled, 30);
    assert_eq!(result.remaining, 0);

    let view = engine.snapshot(&market(), 10).await.unwrap();
    assert_eq!(view.asks.len(), 1);
    assert_eq!(view.asks[0].quantity, 20);
    assert_eq!(view.asks[0].price, dec!(0.70));
}

#[tokio::test]
async fn test_no_cross_leaves_spread() {
    let engine = open_engine();

    engine
        .submit(&market(), make_order(1, OrderSide::Buy, dec!(0.74), 100))
        .await
        .unwrap();
    let result = engine
        .submit(&market(), make_order(2, OrderSide::Sell, dec!(0.76), 75))
        .await
        .unwrap();

    assert!(result.fills.is_empty());
    assert_eq!(result.status, OrderStatus::Pending);

    let view = engine.snapshot(&market(), 10).await.unwrap();
    assert_eq!(view.bids[0].price, dec!(0.74));
    assert_eq!(view.bids[0].quantity, 100);
    assert_eq!(view.asks[0].price, dec!(0.76));
    assert_eq!(view.asks[0].quantity, 75);
    assert_eq!(view.spread(), Some(dec!(0.02)));
}

#[tokio::test]
async fn test_fifo_at_equal_price() {
    let engine = open_engine();
    let base = chrono::Utc::now().timestamp_millis();

    let a = make_order_at(1, OrderSide::Sell, dec!(0.70), 40, base);
    let b = make_order_at(2, OrderSide::Sell, dec!(0.70), 40, base + 1);
    let (a_id, b_id) = (a.id, b.id);
    engine.submit(&market(), a).await.unwrap();
    engine.submit(&market(), b).await.unwrap();

    let result = engine
        .submit(&market(), make_order(3, OrderSide::Buy, dec!(0.70), 60))
        .await
        .unwrap();

    assert_eq!(result.fills.len(), 2);
    assert_eq!(result.fills[0].maker_order_id, a_id);
    assert_eq!(result.fills[0].quantity, 40);
    assert_eq!(result.fills[1].maker_order_id, b_id);
    assert_eq!(result.fills[1].quantity, 20);

    // B keeps 20 on the book.
    let view = engine.snapshot(&market(), 10).await.unwrap();
    assert_eq!(view.asks[0].quantity, 20);
}

#[tokio::test]
async fn test_cancel_after_partial_fill() {
    let engine = open_engine();

    let sell = make_order(1, OrderSide::Sell, dec!(0.80), 100);
    let sell_id = sell.id;
    engine.submit(&market(), sell).await.unwrap();

    let result = engine
        .submit(&market(), make_order(2, OrderSide::Buy, dec!(0.80), 30))
        .await
        .unwrap();
    assert_eq!(result.fills[0].quantity, 30);

    let removed = engine.cancel(&market(), sell_id).await.unwrap().unwrap();
    assert_eq!(removed.quantity, 100);
    assert_eq!(removed.remaining, 70);
    assert_eq!(removed.filled(), 30);

    // Terminal: a second cancel changes nothing.
    assert!(engine.cancel(&market(), sell_id).await.unwrap().is_none());

    let view = engine.snapshot(&market(), 10).await.unwrap();
    assert!(view.asks.is_empty());
}

#[tokio::test]
async fn test_freeze_on_resolution() {
    let engine = open_engine();

    engine
        .submit(&market(), make_order(1, OrderSide::Buy, dec!(0.40), 10))
        .await
        .unwrap();
    engine
        .submit(&market(), make_order(2, OrderSide::Sell, dec!(0.60), 20))
        .await
        .unwrap();

    let drained = engine.freeze(&market()).await.unwrap();
    assert_eq!(drained.len(), 2);

    // In-flight submits after the freeze are refused.
    let err = engine
        .submit(&market(), make_order(3, OrderSide::Buy, dec!(0.50), 5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("frozen"));

    // Freeze is idempotent.
    assert!(engine.freeze(&market()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_filled_plus_remaining_always_equals_quantity() {
    let engine = open_engine();

    engine
        .submit(&market(), make_order(1, OrderSide::Sell, dec!(0.55), 35))
        .await
        .unwrap();
    engine
        .submit(&market(), make_order(2, OrderSide::Sell, dec!(0.60), 15))
        .await
        .unwrap();

    let result = engine
        .submit(&market(), make_order(3, OrderSide::Buy, dec!(0.60), 100))
        .await
        .unwrap();

    assert_eq!(result.filled + result.remaining, 100);
    assert_eq!(result.filled, 50);
    assert_eq!(result.status, OrderStatus::Partial);
    for fill in &result.fills {
        assert!(fill.quantity > 0);
    }

    // Residual rests as a bid; the book is never crossed.
    let view = engine.snapshot(&market(), 10).await.unwrap();
    assert_eq!(view.bids[0].price, dec!(0.60));
    assert!(view.asks.is_empty());
}

#[tokio::test]
async fn test_fee_split_on_simple_cross() {
    // 2% platform fee on 2100 cents = 42, split 21/21.
    let total = trade_total_cents(30, dec!(0.70));
    let fee_rate = dec!(0.02);
    assert_eq!(side_fee_cents(total, fee_rate), 21);
}

#[tokio::test]
async fn test_zero_total_trade_is_still_recorded() {
    let engine = open_engine();

    // A 1-share fill at 0.01 rounds to 1 cent; quantity accounting is the
    // invariant that matters even when fees round to zero.
    engine
        .submit(&market(), make_order(1, OrderSide::Sell, dec!(0.01), 1))
        .await
        .unwrap();
    let result = engine
        .submit(&market(), make_order(2, OrderSide::Buy, dec!(0.01), 1))
        .await
        .unwrap();

    assert_eq!(result.fills.len(), 1);
    assert_eq!(trade_total_cents(1, dec!(0.01)), 1);
    assert_eq!(side_fee_cents(1, dec!(0.02)), 0);
}
