//! Recommendation consumer: detection in, full alert out.
//!
//! Each payload moves through
//! `Received → Validated → OracleQueried → RecommendationValidated → Composed → Published`
//! and is dropped at the first stage that fails. Messages are handled one at
//! a time in delivery order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::error::ExternalCallError;
use crate::oracle::{AdvicePrompt, AdviceOracle, extract_json_object};
use crate::pipeline::{Consumer, Disposition, Stage};
use crate::resilience::{CallGuard, CallPolicy};
use crate::schema::{AlertMessage, DetectionEvent, Message, Recommendation};

pub struct RecommendationConsumer {
    bus: Arc<dyn MessageBus>,
    oracle: Arc<dyn AdviceOracle>,
    guard: CallGuard,
    detections_channel: String,
    alerts_channel: String,
}

impl RecommendationConsumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        oracle: Arc<dyn AdviceOracle>,
        detections_channel: impl Into<String>,
        alerts_channel: impl Into<String>,
        policy: &CallPolicy,
    ) -> Self {
        Self {
            bus,
            oracle,
            guard: CallGuard::new("oracle", policy),
            detections_channel: detections_channel.into(),
            alerts_channel: alerts_channel.into(),
        }
    }

    async fn advise(&self, event: &DetectionEvent) -> Result<String, ExternalCallError> {
        let prompt = AdvicePrompt::for_event(event);
        let oracle = &self.oracle;
        let prompt = &prompt;
        self.guard
            .call(|| async move { oracle.query(prompt).await.map_err(ExternalCallError::from) })
            .await
    }
}

#[async_trait]
impl Consumer for RecommendationConsumer {
    fn name(&self) -> &str {
        "recommendation"
    }

    fn channel(&self) -> &str {
        &self.detections_channel
    }

    async fn handle(&self, payload: &str) -> Disposition {
        let event = match DetectionEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => return Disposition::dropped(Stage::Validated, e),
        };
        debug!(event_id = %event.event_id, sector = %event.warehouse_sector, "Detection validated");

        let reply = match self.advise(&event).await {
            Ok(reply) => reply,
            Err(e) => return Disposition::dropped(Stage::OracleQueried, e),
        };

        let recommendation = match Recommendation::parse(extract_json_object(&reply)) {
            Ok(rec) => rec,
            Err(e) => return Disposition::dropped(Stage::RecommendationValidated, e),
        };

        let event_id = event.event_id.clone();
        let priority = recommendation.mitigation_priority;
        let alert = AlertMessage::full(event, recommendation);
        let wire = match alert.to_payload() {
            Ok(wire) => wire,
            Err(e) => return Disposition::dropped(Stage::Composed, e),
        };

        match self.bus.publish(&self.alerts_channel, wire).await {
            Ok(receivers) => {
                info!(
                    event_id = %event_id,
                    %priority,
                    channel = %self.alerts_channel,
                    receivers,
                    "Published full alert"
                );
                Disposition::Completed
            }
            Err(e) => Disposition::dropped(Stage::Published, e),
        }
    }
}
