//! Cache, Bus, and Lock Plane (Redis)
//!
//! A single `CacheManager` owns the shared Redis client and hands out the
//! typed facades: market read-model cache, pub/sub bus, and the distributed
//! market lock manager. The service degrades gracefully when Redis is
//! down — reads miss to the store, publishes are dropped with a warning —
//! except for market locks, which are required for ownership.

mod keys;
mod lock;
mod market_cache;
mod pubsub;
mod redis_client;

pub use keys::{ttl, CacheKey};
pub use lock::MarketLockManager;
pub use market_cache::MarketCache;
pub use pubsub::{BusFrame, BusSubscriber, Publisher, SubscriberConfig};
pub use redis_client::{RedisClient, RedisConfig};

use std::sync::Arc;
use std::time::Duration;

pub struct CacheManager {
    redis: Arc<RedisClient>,
    market: MarketCache,
    publisher: Publisher,
    subscriber: Arc<BusSubscriber>,
    locks: Arc<MarketLockManager>,
}

impl CacheManager {
    pub async fn new(
        redis_url: &str,
        server_id: &str,
        lock_ttl: Duration,
    ) -> Result<Self, redis::RedisError> {
        let redis = Arc::new(RedisClient::from_url(redis_url).await?);

        let market = MarketCache::new(redis.clone());
        let publisher = Publisher::new(redis.clone());
        let subscriber = Arc::new(BusSubscriber::new(
            redis.raw_client(),
            SubscriberConfig::default(),
        ));
        let locks = Arc::new(MarketLockManager::new(
            redis.clone(),
            server_id.to_string(),
            lock_ttl,
        ));

        Ok(Self {
            redis,
            market,
            publisher,
            subscriber,
            locks,
        })
    }

    pub fn market(&self) -> &MarketCache {
        &self.market
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscriber(&self) -> Arc<BusSubscriber> {
        self.subscriber.clone()
    }

    pub fn locks(&self) -> Arc<MarketLockManager> {
        self.locks.clone()
    }

    pub async fn is_available(&self) -> bool {
        self.redis.is_available().await
    }
}
