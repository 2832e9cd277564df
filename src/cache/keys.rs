//! Cache Key and Channel Name Builders

use crate::models::MarketKey;

/// TTLs in seconds for cached read models.
pub mod ttl {
    /// Market prices change on every trade; keep them hot but short.
    pub const PRICE: u64 = 10;
    pub const ORDERBOOK: u64 = 30;
    pub const TRADES: u64 = 60;
}

pub struct CacheKey;

impl CacheKey {
    pub fn orderbook(market: &MarketKey) -> String {
        format!("orderbook:{}:{}", market.milestone_id, market.option)
    }

    pub fn price(market: &MarketKey) -> String {
        format!("price:{}:{}", market.milestone_id, market.option)
    }

    pub fn trades(market: &MarketKey) -> String {
        format!("trades:{}:{}", market.milestone_id, market.option)
    }

    pub fn lock(market: &MarketKey) -> String {
        format!("lock:{}:{}", market.milestone_id, market.option)
    }

    /// Bus topic carrying broadcast frames for one market.
    pub fn events_channel(market: &MarketKey) -> String {
        format!("events:{}:{}", market.milestone_id, market.option)
    }

    /// Pattern covering every market's bus topic.
    pub const EVENTS_PATTERN: &'static str = "events:*";

    /// Recover the milestone id from a bus topic name.
    pub fn milestone_of_channel(channel: &str) -> Option<i64> {
        let mut parts = channel.split(':');
        match (parts.next(), parts.next()) {
            (Some("events"), Some(milestone)) => milestone.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;

    #[test]
    fn test_key_formats() {
        let market = MarketKey::new(42, Outcome::Success);
        assert_eq!(CacheKey::orderbook(&market), "orderbook:42:success");
        assert_eq!(CacheKey::price(&market), "price:42:success");
        assert_eq!(CacheKey::trades(&market), "trades:42:success");
        assert_eq!(CacheKey::lock(&market), "lock:42:success");
        assert_eq!(CacheKey::events_channel(&market), "events:42:success");
    }

    #[test]
    fn test_milestone_of_channel() {
        assert_eq!(CacheKey::milestone_of_channel("events:42:fail"), Some(42));
        assert_eq!(CacheKey::milestone_of_channel("price:42:fail"), None);
        assert_eq!(CacheKey::milestone_of_channel("events:abc:fail"), None);
    }
}
