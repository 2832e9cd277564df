//! Distributed Market Lock Manager
//!
//! One writer per market across the fleet. A lock is a Redis key
//! `lock:{milestone}:{option}` holding the owner's server id with a TTL
//! lease. Renew and release are compare-and-set scripts so a stale owner
//! can never extend or delete a lock it has lost.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;

use super::keys::CacheKey;
use super::redis_client::RedisClient;
use crate::models::MarketKey;

/// PEXPIRE only if the value still matches the caller's token.
const RENEW_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// DEL only if the value still matches the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct MarketLockManager {
    redis: Arc<RedisClient>,
    server_id: String,
    ttl: Duration,
    /// Markets this instance currently believes it owns.
    held: DashSet<MarketKey>,
}

impl MarketLockManager {
    pub fn new(redis: Arc<RedisClient>, server_id: String, ttl: Duration) -> Self {
        Self {
            redis,
            server_id,
            ttl,
            held: DashSet::new(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Whether this instance holds the market (local view; the lease in
    /// Redis is authoritative).
    pub fn holds(&self, market: &MarketKey) -> bool {
        self.held.contains(market)
    }

    pub fn held_markets(&self) -> Vec<MarketKey> {
        self.held.iter().map(|m| *m).collect()
    }

    /// Try to become the writer for a market. Idempotent for the current
    /// holder: re-acquiring a market we already hold renews it instead.
    pub async fn acquire(&self, market: &MarketKey) -> Result<bool, redis::RedisError> {
        if self.held.contains(market) {
            return self.renew(market).await;
        }

        let key = CacheKey::lock(market);
        let acquired = self
            .redis
            .set_nx_px(&key, &self.server_id, self.ttl.as_millis() as u64)
            .await?;

        if acquired {
            self.held.insert(*market);
            tracing::info!("Acquired market lock {}", market);
        }

        Ok(acquired)
    }

    /// Extend the lease; returns false (and forgets the market) when the
    /// lock was lost to TTL expiry or another instance.
    pub async fn renew(&self, market: &MarketKey) -> Result<bool, redis::RedisError> {
        let key = CacheKey::lock(market);
        let renewed = self
            .redis
            .eval_i64(
                RENEW_SCRIPT,
                &key,
                &[
                    self.server_id.clone(),
                    self.ttl.as_millis().to_string(),
                ],
            )
            .await?
            == 1;

        if renewed {
            self.held.insert(*market);
        } else {
            self.held.remove(market);
            tracing::warn!("Lost market lock {}", market);
        }

        Ok(renewed)
    }

    /// Compare-and-delete release. Safe to call when the lock is already
    /// gone or owned by someone else.
    pub async fn release(&self, market: &MarketKey) -> Result<bool, redis::RedisError> {
        self.held.remove(market);
        let key = CacheKey::lock(market);
        let released = self
            .redis
            .eval_i64(RELEASE_SCRIPT, &key, &[self.server_id.clone()])
            .await?
            == 1;

        if released {
            tracing::info!("Released market lock {}", market);
        }

        Ok(released)
    }

    /// Release every held lock; called during shutdown after the engine
    /// queues have drained.
    pub async fn release_all(&self) {
        for market in self.held_markets() {
            if let Err(e) = self.release(&market).await {
                tracing::warn!("Failed to release lock {} on shutdown: {}", market, e);
            }
        }
    }

    /// Heartbeat every held lease. Returns the markets whose lease was
    /// lost so the caller can tear down their engine workers.
    pub async fn renew_all(&self) -> Vec<MarketKey> {
        let mut lost = Vec::new();
        for market in self.held_markets() {
            match self.renew(&market).await {
                Ok(true) => {}
                Ok(false) => lost.push(market),
                Err(e) => {
                    tracing::warn!("Heartbeat failed for {}: {}", market, e);
                }
            }
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;

    #[test]
    fn test_lock_key_matches_cache_contract() {
        let market = MarketKey::new(7, Outcome::Fail);
        assert_eq!(CacheKey::lock(&market), "lock:7:fail");
    }

    #[test]
    fn test_scripts_are_compare_and_set() {
        assert!(RENEW_SCRIPT.contains("pexpire"));
        assert!(RELEASE_SCRIPT.contains("del"));
        // Both must check ownership before acting.
        assert!(RENEW_SCRIPT.contains("ARGV[1]"));
        assert!(RELEASE_SCRIPT.contains("ARGV[1]"));
    }
}
