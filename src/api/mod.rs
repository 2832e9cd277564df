//! HTTP Surface
//!
//! Thin handlers over the trading/query services plus the SSE stream.
//! Everything below this layer is transport-agnostic.

pub mod auth;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use crate::cache::CacheManager;
use crate::config::AppConfig;
use crate::db::Database;
use crate::engine::EngineManager;
use crate::services::{
    EventStore, LifecycleService, MarketDataService, QueryService, TradingService,
};

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub cache: Arc<CacheManager>,
    pub engine: Arc<EngineManager>,
    pub events: Arc<EventStore>,
    pub market_data: Arc<MarketDataService>,
    pub trading: Arc<TradingService>,
    pub query: Arc<QueryService>,
    pub lifecycle: Arc<LifecycleService>,
    pub hub: Arc<BroadcastHub>,
}
