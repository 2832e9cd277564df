pub mod event;
pub mod market;
pub mod order;
pub mod position;
pub mod trade;
pub mod wallet;

pub use event::{EventPayload, OrderEvent, OrderEventKind};
pub use market::{
    MarketData, MarketKey, MilestoneStatus, OrderBookLevel, OrderBookView, Outcome, PriceCandle,
};
pub use order::{
    is_valid_price, CollateralMode, CreateOrderRequest, Order, OrderResponse, OrderSide,
    OrderStatus, MAX_PRICE, MIN_PRICE,
};
pub use position::{Position, PositionView};
pub use trade::{side_fee_cents, trade_total_cents, Trade};
pub use wallet::Wallet;
