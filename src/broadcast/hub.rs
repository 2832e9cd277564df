//! Broadcast Hub
//!
//! Per-milestone fan-out. Each milestone gets a lossy ring channel:
//! a subscriber that cannot keep up skips ahead and loses the oldest
//! frames, and publishing never blocks the engine. The bus bridge feeds
//! the hub from the shared Redis topic so trades executed on any instance
//! reach every local subscriber.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::messages::BroadcastMessage;
use crate::cache::{BusSubscriber, CacheKey};

/// Frames buffered per milestone before slow subscribers start losing the
/// oldest ones.
const CHANNEL_CAPACITY: usize = 256;

pub struct BroadcastHub {
    channels: DashMap<i64, broadcast::Sender<BroadcastMessage>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a milestone's stream, creating the channel on first
    /// use.
    pub fn subscribe(&self, milestone_id: i64) -> broadcast::Receiver<BroadcastMessage> {
        self.channels
            .entry(milestone_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver a frame to local subscribers. Returns how many received it.
    pub fn publish_local(&self, milestone_id: i64, message: BroadcastMessage) -> usize {
        let Some(sender) = self.channels.get(&milestone_id) else {
            return 0;
        };
        sender.send(message).unwrap_or(0)
    }

    pub fn subscriber_count(&self, milestone_id: i64) -> usize {
        self.channels
            .get(&milestone_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels nobody listens to; called on a timer so disconnected
    /// milestones release their ring buffers.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Relay bus frames into local channels until shutdown.
    pub async fn run_bus_bridge(self: Arc<Self>, bus: Arc<BusSubscriber>) {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let Some(milestone_id) = CacheKey::milestone_of_channel(&frame.channel) else {
                        continue;
                    };
                    match serde_json::from_str::<BroadcastMessage>(&frame.payload) {
                        Ok(message) => {
                            self.publish_local(milestone_id, message);
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Undecodable frame on {}: {}",
                                frame.channel,
                                e
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    metrics::counter!("broadcast_bridge_lagged").increment(n);
                    tracing::warn!("Bus bridge lagged {} frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!("Bus bridge channel closed");
                    return;
                }
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let hub = BroadcastHub::new();
        let mut rx = hub.subscribe(42);

        let delivered = hub.publish_local(42, BroadcastMessage::ping());
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            BroadcastMessage::Ping { .. } => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.publish_local(1, BroadcastMessage::ping()), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_oldest_but_not_newest() {
        let hub = BroadcastHub::new();
        let mut rx = hub.subscribe(42);

        // Overflow the ring; the subscriber must still observe the tail.
        for i in 0..(CHANNEL_CAPACITY + 50) {
            hub.publish_local(
                42,
                BroadcastMessage::Ping {
                    timestamp: i as i64,
                },
            );
        }

        // First recv reports the lag, subsequent recvs resume at the
        // oldest retained frame.
        let mut seen_any = false;
        loop {
            match rx.try_recv() {
                Ok(_) => {
                    seen_any = true;
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    assert!(n >= 50);
                }
                Err(_) => break,
            }
        }
        assert!(seen_any);
    }

    #[tokio::test]
    async fn test_prune_drops_dead_channels() {
        let hub = BroadcastHub::new();
        {
            let _rx = hub.subscribe(1);
            assert_eq!(hub.subscriber_count(1), 1);
        }
        hub.prune();
        assert_eq!(hub.subscriber_count(1), 0);
    }
}
