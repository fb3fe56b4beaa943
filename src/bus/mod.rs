//! Publish/subscribe message bus addressed by named channels.
//!
//! Delivery is best-effort and at-most-once: a payload reaches only the
//! subscribers active when it was published, there is no acknowledgment,
//! and nothing is replayed.

pub mod local;

pub use local::LocalBus;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::BusError;
use crate::resilience::RetryPolicy;

/// Raw wire payload: UTF-8 JSON text.
pub type Payload = String;

/// Continuous stream of payloads for one channel.
///
/// Ends only when the bus drops the channel. Not restartable.
pub struct Subscription {
    channel: String,
    inner: Pin<Box<dyn Stream<Item = Payload> + Send>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, inner: impl Stream<Item = Payload> + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            inner: Box::pin(inner),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.inner.next().await
    }
}

/// The narrow contract every consumer and producer sees.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Hand a payload to the bus for broadcast. Returns once accepted; no receipt
    /// confirmation. The returned count is how many subscribers it was offered to.
    async fn publish(&self, channel: &str, payload: Payload) -> Result<usize, BusError>;

    /// Start receiving payloads published to `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
}

/// Subscribe, retrying with backoff on failure.
///
/// Gives up after the policy's attempts are spent (or on shutdown) and returns
/// the last error, which the caller treats as fatal.
pub async fn subscribe_with_retry(
    bus: &dyn MessageBus,
    channel: &str,
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
) -> Result<Subscription, BusError> {
    let mut attempt = 1;
    loop {
        match bus.subscribe(channel).await {
            Ok(sub) => {
                info!(channel, attempt, "Subscribed to channel");
                return Ok(sub);
            }
            Err(e) if attempt < policy.max_attempts && !shutdown.is_cancelled() => {
                let delay = policy.delay_for(attempt);
                warn!(channel, attempt, error = %e, ?delay, "Subscribe failed, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(e),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
