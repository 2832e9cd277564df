//! Market Read-Model Cache
//!
//! Short-TTL cache of the per-market snapshot, order-book view, and recent
//! trades. Cache errors are logged and treated as misses; the store is the
//! source of truth.

use std::sync::Arc;

use super::keys::{ttl, CacheKey};
use super::redis_client::RedisClient;
use crate::models::{MarketData, MarketKey, OrderBookView, Trade};

pub struct MarketCache {
    redis: Arc<RedisClient>,
}

impl MarketCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    pub async fn get_market_data(&self, market: &MarketKey) -> Option<MarketData> {
        self.get_json(&CacheKey::price(market)).await
    }

    pub async fn set_market_data(&self, market: &MarketKey, data: &MarketData) {
        self.set_json(&CacheKey::price(market), data, ttl::PRICE)
            .await;
    }

    pub async fn get_orderbook(&self, market: &MarketKey) -> Option<OrderBookView> {
        self.get_json(&CacheKey::orderbook(market)).await
    }

    pub async fn set_orderbook(&self, market: &MarketKey, view: &OrderBookView) {
        self.set_json(&CacheKey::orderbook(market), view, ttl::ORDERBOOK)
            .await;
    }

    pub async fn get_recent_trades(&self, market: &MarketKey) -> Option<Vec<Trade>> {
        self.get_json(&CacheKey::trades(market)).await
    }

    pub async fn set_recent_trades(&self, market: &MarketKey, trades: &[Trade]) {
        self.set_json(&CacheKey::trades(market), &trades, ttl::TRADES)
            .await;
    }

    /// Drop the book and trade views after a fill so the next read refills
    /// them from the store.
    pub async fn invalidate_market(&self, market: &MarketKey) {
        for key in [
            CacheKey::orderbook(market),
            CacheKey::trades(market),
            CacheKey::price(market),
        ] {
            if let Err(e) = self.redis.del(&key).await {
                tracing::warn!("Failed to invalidate cache key {}: {}", key, e);
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.redis.get(key).await {
            Ok(Some(value)) => serde_json::from_str(&value).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Cache serialization failed for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.redis.set_ex(key, json, ttl_secs).await {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }
}
