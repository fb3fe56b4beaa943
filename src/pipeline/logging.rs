//! Logging consumer: persists every valid detection, keyed by `event_id`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExternalCallError;
use crate::pipeline::{Consumer, Disposition, Stage};
use crate::resilience::{CallGuard, CallPolicy};
use crate::schema::{DetectionEvent, Message};
use crate::store::EventStore;

pub struct LoggingConsumer {
    store: Arc<dyn EventStore>,
    guard: CallGuard,
    channel: String,
}

impl LoggingConsumer {
    pub fn new(store: Arc<dyn EventStore>, channel: impl Into<String>, policy: &CallPolicy) -> Self {
        Self {
            store,
            guard: CallGuard::new("store", policy),
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Consumer for LoggingConsumer {
    fn name(&self) -> &str {
        "logging"
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    async fn handle(&self, payload: &str) -> Disposition {
        let event = match DetectionEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => return Disposition::dropped(Stage::Validated, e),
        };

        let store = &self.store;
        let event_ref = &event;
        let written = self
            .guard
            .call(|| async move {
                store
                    .upsert_detection(event_ref)
                    .await
                    .map_err(ExternalCallError::from)
            })
            .await;

        match written {
            Ok(()) => {
                debug!(event_id = %event.event_id, "Detection persisted");
                Disposition::Completed
            }
            Err(e) => Disposition::dropped(Stage::Persisted, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;
    use std::time::Duration;

    fn payload(id: &str, confidence: f64) -> String {
        DetectionEvent::new(id, "CAM", "Sector 1", confidence, [1, 2, 3, 4])
            .to_payload()
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_ids_overwrite() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let c = LoggingConsumer::new(store.clone(), "det", &CallPolicy::once(Duration::from_secs(1)));

        assert!(c.handle(&payload("e1", 0.4)).await.is_completed());
        assert!(c.handle(&payload("e1", 0.6)).await.is_completed());

        assert_eq!(store.count_detections().await.unwrap(), 1);
        let row = store.get_detection("e1").await.unwrap().unwrap();
        assert!((row.confidence - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn invalid_payload_writes_nothing() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let c = LoggingConsumer::new(store.clone(), "det", &CallPolicy::once(Duration::from_secs(1)));

        let outcome = c.handle("not json").await;
        assert!(matches!(outcome, Disposition::Dropped { stage: Stage::Validated, .. }));
        assert_eq!(store.count_detections().await.unwrap(), 0);
    }
}
