//! SMS delivery through the Twilio REST API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::SinkError;

const SINK: &str = "sms";

/// Anything that can deliver a short text message.
#[async_trait]
pub trait SmsSink: Send + Sync {
    async fn send(&self, destination: &str, body: &str) -> Result<(), SinkError>;
}

/// Twilio account and routing.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    /// Where alerts go.
    pub to_number: String,
    /// Overridable for testing against a local endpoint.
    pub api_base: String,
}

/// Twilio Messages API client.
pub struct TwilioSms {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioSms {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    fn request(&self, destination: &str, body: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&[
                ("To", destination),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
    }
}

#[async_trait]
impl SmsSink for TwilioSms {
    async fn send(&self, destination: &str, body: &str) -> Result<(), SinkError> {
        let resp = self
            .request(destination, body)
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

        info!(to = %destination, "SMS alert sent");
        Ok(())
    }
}
