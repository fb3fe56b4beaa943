//! Ultrasonic repeller control.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::SinkError;
use crate::schema::FrequencyDescriptor;

const SINK: &str = "actuator";

/// Triggers the repeller. No acknowledgment beyond the call's own result.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn activate(&self, frequency: &FrequencyDescriptor) -> Result<(), SinkError>;
}

/// Records activations in the log only. Used when no device endpoint is configured.
#[derive(Debug, Default)]
pub struct LogActuator;

#[async_trait]
impl Actuator for LogActuator {
    async fn activate(&self, frequency: &FrequencyDescriptor) -> Result<(), SinkError> {
        info!(frequency = %frequency, "Ultrasonic repeller activated");
        Ok(())
    }
}

#[derive(Serialize)]
struct ActivateRequest<'a> {
    action: &'static str,
    frequency_khz: &'a str,
}

/// Posts activation commands to a device controller over HTTP.
pub struct HttpActuator {
    url: String,
    client: reqwest::Client,
}

impl HttpActuator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, frequency: &FrequencyDescriptor) -> reqwest::RequestBuilder {
        let frequency = frequency.to_string();
        self.client.post(&self.url).json(&ActivateRequest {
            action: "activate_repeller",
            frequency_khz: &frequency,
        })
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn activate(&self, frequency: &FrequencyDescriptor) -> Result<(), SinkError> {
        let resp = self
            .request(frequency)
            .send()
            .await
            .map_err(|e| SinkError::SendFailed {
                sink: SINK.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                sink: SINK.into(),
                status: status.as_u16(),
                body,
            });
        }

        info!(frequency = %frequency, url = %self.url, "Ultrasonic repeller activated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_actuator_always_succeeds() {
        assert!(LogActuator.activate(&FrequencyDescriptor::Unknown).await.is_ok());
    }

    #[test]
    fn http_request_carries_frequency() {
        let actuator = HttpActuator::new("http://device.local/activate");
        let req = actuator
            .request(&FrequencyDescriptor::Known("30-50 kHz".into()))
            .build()
            .unwrap();

        let body: serde_json::Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["frequency_khz"], "30-50 kHz");
        assert_eq!(body["action"], "activate_repeller");
    }

    #[test]
    fn unknown_frequency_is_sent_as_marker() {
        let actuator = HttpActuator::new("http://device.local/activate");
        let req = actuator.request(&FrequencyDescriptor::Unknown).build().unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["frequency_khz"], "unknown");
    }
}
