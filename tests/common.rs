use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use blueprint_exchange::engine::BookOrder;
use blueprint_exchange::models::{MarketKey, OrderSide, Outcome};

pub fn market() -> MarketKey {
    MarketKey::new(42, Outcome::Success)
}

/// Quickly build a limit order for testing.
pub fn make_order(user_id: i64, side: OrderSide, price: Decimal, quantity: i64) -> BookOrder {
    BookOrder {
        id: Uuid::new_v4(),
        user_id,
        side,
        price,
        quantity,
        remaining: quantity,
        created_at_ms: Utc::now().timestamp_millis(),
        expires_at_ms: None,
    }
}

/// Same, with a pinned creation timestamp for FIFO checks.
pub fn make_order_at(
    user_id: i64,
    side: OrderSide,
    price: Decimal,
    quantity: i64,
    created_at_ms: i64,
) -> BookOrder {
    let mut order = make_order(user_id, side, price, quantity);
    order.created_at_ms = created_at_ms;
    order
}
