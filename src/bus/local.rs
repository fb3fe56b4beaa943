//! In-process bus — one tokio broadcast channel per named channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use super::{MessageBus, Payload, Subscription};
use crate::error::BusError;

/// Default per-channel buffer before slow subscribers start losing messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus living inside the process.
///
/// A subscriber that falls more than `capacity` messages behind loses the
/// overwritten ones and logs how many.
pub struct LocalBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Payload>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Shut the bus down. Open subscriptions end; later calls fail.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.write().await.clear();
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, channel: &str, payload: Payload) -> Result<usize, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed {
                channel: channel.to_string(),
            });
        }

        let channels = self.channels.read().await;
        let Some(tx) = channels.get(channel) else {
            debug!(channel, "Published to channel with no subscribers");
            return Ok(0);
        };

        // No active receivers is not an error for fire-and-forget broadcast
        Ok(tx.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable {
                reason: "bus is closed".to_string(),
            });
        }

        let rx = {
            let mut channels = self.channels.write().await;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let name = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(payload) => Some(payload),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %name, skipped, "Subscriber lagged, messages lost");
                None
            }
        });

        Ok(Subscription::new(channel, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fan_out_reaches_every_active_subscriber() {
        let bus = LocalBus::new(8);
        let mut a = bus.subscribe("detections").await.unwrap();
        let mut b = bus.subscribe("detections").await.unwrap();

        let offered = bus.publish("detections", "one".into()).await.unwrap();
        assert_eq!(offered, 2);
        assert_eq!(a.recv().await.as_deref(), Some("one"));
        assert_eq!(b.recv().await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn late_subscribers_get_no_history() {
        let bus = LocalBus::new(8);
        let _early = bus.subscribe("alerts").await.unwrap();
        bus.publish("alerts", "before".into()).await.unwrap();

        let mut late = bus.subscribe("alerts").await.unwrap();
        bus.publish("alerts", "after".into()).await.unwrap();
        assert_eq!(late.recv().await.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = LocalBus::new(8);
        let mut alerts = bus.subscribe("alerts").await.unwrap();
        bus.publish("detections", "d".into()).await.unwrap();
        bus.publish("alerts", "a".into()).await.unwrap();
        assert_eq!(alerts.recv().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_accepted() {
        let bus = LocalBus::new(8);
        assert_eq!(bus.publish("nobody", "x".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_overwritten_messages() {
        let bus = LocalBus::new(2);
        let mut sub = bus.subscribe("d").await.unwrap();
        for i in 0..5 {
            bus.publish("d", i.to_string()).await.unwrap();
        }
        // Capacity 2: only the newest two survive
        assert_eq!(sub.recv().await.as_deref(), Some("3"));
        assert_eq!(sub.recv().await.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_rejects_calls() {
        let bus = LocalBus::new(8);
        let mut sub = bus.subscribe("d").await.unwrap();
        bus.close().await;

        let next = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert!(next.is_none());
        assert!(matches!(bus.publish("d", "x".into()).await, Err(BusError::Closed { .. })));
        assert!(matches!(bus.subscribe("d").await, Err(BusError::Unavailable { .. })));
    }
}
