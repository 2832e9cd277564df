//! Order Matching Engine
//!
//! Price-time-priority matching for milestone prediction markets.
//!
//! # Architecture
//!
//! ```text
//! TradingService (command side)
//!   ↓  bounded per-market queue (serialisation unit)
//! EngineManager
//!   └→ market worker task
//!        └→ OrderBook (bids/asks, FIFO levels)
//! ```
//!
//! The engine is pure in-memory state: it returns fills and never touches
//! the durable store. Persistence, wallet settlement, and event-log
//! appends are the command handler's duty. Recovery rebuilds a book from
//! persisted open orders plus an event-log replay.

mod book;
mod manager;
mod replay;
mod types;

pub use book::OrderBook;
pub use manager::{EngineCommand, EngineManager};
pub use replay::Replayer;
pub use types::{now_ms, ms_to_datetime, BookOrder, EngineError, Fill, MatchResult, PriceTick};
