//! Redis Pub/Sub Bus
//!
//! Fan-out plane between instances: the market lock holder publishes
//! broadcast frames to the market's `events:{milestone}:{option}` topic and
//! every instance's subscriber relays them into its local hub, so trades
//! executed anywhere reach all connected subscribers.

use futures::StreamExt;
use redis::RedisError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::keys::CacheKey;
use super::redis_client::RedisClient;
use crate::models::MarketKey;

/// One frame received from the bus, still JSON-encoded.
#[derive(Debug, Clone)]
pub struct BusFrame {
    pub channel: String,
    pub payload: String,
}

pub struct Publisher {
    redis: Arc<RedisClient>,
}

impl Publisher {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    /// Publish a JSON-serializable frame to a market's topic.
    pub async fn publish_market<T: Serialize>(
        &self,
        market: &MarketKey,
        message: &T,
    ) -> Result<i32, RedisError> {
        let json = serde_json::to_string(message).map_err(|e| {
            RedisError::from((
                redis::ErrorKind::IoError,
                "Serialization error",
                e.to_string(),
            ))
        })?;
        self.redis
            .publish(&CacheKey::events_channel(market), json)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub buffer_size: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Long-lived bus listener. Holds a dedicated pub/sub connection (the
/// managed connection cannot enter subscribe mode) and forwards every
/// frame into a local broadcast channel; reconnects with a fixed delay.
pub struct BusSubscriber {
    client: redis::Client,
    config: SubscriberConfig,
    sender: broadcast::Sender<BusFrame>,
}

impl BusSubscriber {
    pub fn new(client: redis::Client, config: SubscriberConfig) -> Self {
        let (sender, _) = broadcast::channel(config.buffer_size);
        Self {
            client,
            config,
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusFrame> {
        self.sender.subscribe()
    }

    /// Run the listen loop until the process shuts down.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listen_once().await {
                Ok(()) => {
                    tracing::warn!("Bus subscription stream ended, resubscribing");
                }
                Err(e) => {
                    tracing::warn!("Bus subscription failed: {}, retrying", e);
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.reconnect_delay_ms)).await;
        }
    }

    async fn listen_once(&self) -> Result<(), RedisError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.psubscribe(CacheKey::EVENTS_PATTERN).await?;
        tracing::info!("Bus subscriber listening on {}", CacheKey::EVENTS_PATTERN);

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Dropping undecodable bus frame on {}: {}", channel, e);
                    continue;
                }
            };
            // No receivers is fine; frames are transient.
            let _ = self.sender.send(BusFrame { channel, payload });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_config_default() {
        let config = SubscriberConfig::default();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.reconnect_delay_ms, 1000);
    }
}
