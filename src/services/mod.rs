//! Service Layer
//!
//! CQRS split: `TradingService` is the only writer (validate, reserve,
//! match, settle, emit); `QueryService` serves cache-first read models.
//! The event store, wallet, position, market-data, and lifecycle services
//! are the shared substrate both sides compose.

pub mod events;
pub mod lifecycle;
pub mod market_data;
pub mod positions;
pub mod query;
pub mod trading;
pub mod wallet;

pub use events::EventStore;
pub use lifecycle::LifecycleService;
pub use market_data::{MarketDataService, PriceMove};
pub use positions::{PositionDelta, PositionService};
pub use query::QueryService;
pub use trading::{CreateOrderOutcome, TradingService};
pub use wallet::WalletService;
