//! Consumer runtime: one long-running loop per subscribed component.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, subscribe_with_retry};
use crate::error::{BusError, ExternalCallError};
use crate::pipeline::dead_letter::{DeadLetter, DeadLetterSink};
use crate::resilience::{CallGuard, CallPolicy, RetryPolicy};

/// Where in its handling a message was when it completed or was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    OracleQueried,
    RecommendationValidated,
    Composed,
    Published,
    Persisted,
    Notified,
    Actuated,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::OracleQueried => "oracle_queried",
            Self::RecommendationValidated => "recommendation_validated",
            Self::Composed => "composed",
            Self::Published => "published",
            Self::Persisted => "persisted",
            Self::Notified => "notified",
            Self::Actuated => "actuated",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "validated" => Ok(Self::Validated),
            "oracle_queried" => Ok(Self::OracleQueried),
            "recommendation_validated" => Ok(Self::RecommendationValidated),
            "composed" => Ok(Self::Composed),
            "published" => Ok(Self::Published),
            "persisted" => Ok(Self::Persisted),
            "notified" => Ok(Self::Notified),
            "actuated" => Ok(Self::Actuated),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Outcome of handling one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    /// Abandoned while attempting `stage`.
    Dropped { stage: Stage, reason: String },
    /// Handled to the end, but some independent side effects failed.
    Partial { failed: Vec<(Stage, String)> },
}

impl Disposition {
    pub fn dropped(stage: Stage, reason: impl fmt::Display) -> Self {
        Self::Dropped {
            stage,
            reason: reason.to_string(),
        }
    }

    /// `Completed` when nothing failed, otherwise `Partial`.
    pub fn from_failures(failed: Vec<(Stage, String)>) -> Self {
        if failed.is_empty() {
            Self::Completed
        } else {
            Self::Partial { failed }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A component that reacts to every payload on one channel.
///
/// `handle` must not panic or return early on bad input; every failure is a
/// [`Disposition::Dropped`] or part of a [`Disposition::Partial`].
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Channel this consumer subscribes to.
    fn channel(&self) -> &str;

    async fn handle(&self, payload: &str) -> Disposition;
}

/// Subscribe `consumer` to its channel and spawn its loop.
///
/// The subscription is established before this returns, so anything
/// published afterwards is seen. Failing to subscribe after `subscribe_policy`
/// is exhausted is returned to the caller as fatal. Dead-letter writes run
/// under `dead_letter_policy`, so a stuck sink delays the loop by at most its
/// timeout budget.
pub async fn spawn_consumer(
    bus: &dyn MessageBus,
    consumer: Arc<dyn Consumer>,
    dead_letters: Arc<dyn DeadLetterSink>,
    shutdown: CancellationToken,
    subscribe_policy: &RetryPolicy,
    dead_letter_policy: &CallPolicy,
) -> Result<JoinHandle<()>, BusError> {
    let mut subscription =
        subscribe_with_retry(bus, consumer.channel(), subscribe_policy, &shutdown).await?;
    let guard = CallGuard::new(format!("{}.dead_letters", consumer.name()), dead_letter_policy);

    let handle = tokio::spawn(async move {
        let name = consumer.name().to_string();
        info!(consumer = %name, channel = %subscription.channel(), "Consumer started");

        loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(consumer = %name, "Shutdown signal received, consumer stopping");
                    break;
                }
                next = subscription.recv() => match next {
                    Some(payload) => payload,
                    None => {
                        warn!(consumer = %name, "Subscription closed, consumer stopping");
                        break;
                    }
                },
            };

            let failed = match consumer.handle(&payload).await {
                Disposition::Completed => {
                    debug!(consumer = %name, "Message handled");
                    continue;
                }
                Disposition::Dropped { stage, reason } => {
                    warn!(consumer = %name, %stage, %reason, "Message dropped");
                    vec![(stage, reason)]
                }
                Disposition::Partial { failed } => {
                    for (stage, reason) in &failed {
                        warn!(consumer = %name, %stage, %reason, "Side effect failed");
                    }
                    failed
                }
            };

            for (stage, reason) in failed {
                let letter = DeadLetter::new(name.as_str(), stage, reason, payload.clone());
                record_dead_letter(&guard, dead_letters.as_ref(), &letter).await;
            }
        }
    });

    Ok(handle)
}

/// Spawn every consumer in order, stopping at the first that cannot subscribe.
pub async fn spawn_consumers(
    bus: &dyn MessageBus,
    consumers: Vec<Arc<dyn Consumer>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    shutdown: &CancellationToken,
    subscribe_policy: &RetryPolicy,
    dead_letter_policy: &CallPolicy,
) -> crate::error::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(consumers.len());
    for consumer in consumers {
        let handle = spawn_consumer(
            bus,
            consumer,
            dead_letters.clone(),
            shutdown.clone(),
            subscribe_policy,
            dead_letter_policy,
        )
        .await?;
        handles.push(handle);
    }
    Ok(handles)
}

async fn record_dead_letter(guard: &CallGuard, sink: &dyn DeadLetterSink, letter: &DeadLetter) {
    let result = guard
        .call(|| async move { sink.record(letter).await.map_err(ExternalCallError::from) })
        .await;
    if let Err(e) = result {
        warn!(consumer = %letter.consumer, stage = %letter.stage, error = %e, "Failed to record dead letter");
    }
}
