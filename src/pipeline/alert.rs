//! Alert consumer: turns a full alert into an SMS and, when asked for, a
//! repeller activation.
//!
//! The two side effects are independent. A failed SMS does not stop the
//! actuator from being tried; each failure is reported as its own dead letter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ExternalCallError;
use crate::notify::{Actuator, SmsSink};
use crate::pipeline::{Consumer, Disposition, Stage};
use crate::resilience::{CallGuard, CallPolicy};
use crate::schema::{AlertMessage, Message};

/// Short text sent for every alert.
pub fn format_sms(alert: &AlertMessage) -> String {
    let rec = &alert.recommendation;
    format!(
        "CRITICAL ALERT! Rat in {}.\nSummary: {}\nPriority: {}\nAction 1: {}",
        alert.event.warehouse_sector,
        rec.summary,
        rec.mitigation_priority,
        rec.first_action().unwrap_or("-"),
    )
}

pub struct AlertConsumer {
    sms: Arc<dyn SmsSink>,
    actuator: Arc<dyn Actuator>,
    destination: String,
    sms_guard: CallGuard,
    actuator_guard: CallGuard,
    channel: String,
}

impl AlertConsumer {
    pub fn new(
        sms: Arc<dyn SmsSink>,
        actuator: Arc<dyn Actuator>,
        destination: impl Into<String>,
        channel: impl Into<String>,
        sms_policy: &CallPolicy,
        actuator_policy: &CallPolicy,
    ) -> Self {
        Self {
            sms,
            actuator,
            destination: destination.into(),
            sms_guard: CallGuard::new("sms", sms_policy),
            actuator_guard: CallGuard::new("actuator", actuator_policy),
            channel: channel.into(),
        }
    }

    async fn notify(&self, alert: &AlertMessage) -> Result<(), ExternalCallError> {
        let body = format_sms(alert);
        let sms = &self.sms;
        let (destination, body) = (self.destination.as_str(), body.as_str());
        self.sms_guard
            .call(|| async move { sms.send(destination, body).await.map_err(ExternalCallError::from) })
            .await
    }

    async fn actuate(&self, alert: &AlertMessage) -> Result<(), ExternalCallError> {
        let Some(frequency) = alert.recommendation.activation() else {
            info!(event_id = %alert.event.event_id, "Ultrasonic activation not required");
            return Ok(());
        };
        let actuator = &self.actuator;
        let frequency = &frequency;
        self.actuator_guard
            .call(|| async move { actuator.activate(frequency).await.map_err(ExternalCallError::from) })
            .await
    }
}

#[async_trait]
impl Consumer for AlertConsumer {
    fn name(&self) -> &str {
        "alert"
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    async fn handle(&self, payload: &str) -> Disposition {
        let alert = match AlertMessage::parse(payload) {
            Ok(alert) => alert,
            Err(e) => return Disposition::dropped(Stage::Validated, e),
        };
        info!(
            event_id = %alert.event.event_id,
            priority = %alert.recommendation.mitigation_priority,
            "Received full alert"
        );

        let mut failed = Vec::new();
        if let Err(e) = self.notify(&alert).await {
            warn!(event_id = %alert.event.event_id, error = %e, "SMS alert failed");
            failed.push((Stage::Notified, e.to_string()));
        }
        if let Err(e) = self.actuate(&alert).await {
            warn!(event_id = %alert.event.event_id, error = %e, "Actuator activation failed");
            failed.push((Stage::Actuated, e.to_string()));
        }

        Disposition::from_failures(failed)
    }
}
