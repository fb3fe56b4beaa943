//! Advice oracle — the external reasoning service behind recommendations.
//!
//! Supports:
//! - **OpenAI**: via rig-core
//! - **Anthropic**: via rig-core
//!
//! The pipeline places no trust in the reply beyond structural validity:
//! whatever text comes back is handed to the `Recommendation` schema.

pub mod prompt;
mod rig_oracle;

pub use prompt::{AdvicePrompt, extract_json_object};
pub use rig_oracle::RigOracle;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::OracleError;

/// Anything that can turn a detection context into a raw structured reply.
#[async_trait]
pub trait AdviceOracle: Send + Sync {
    /// Identifier for logs.
    fn model_name(&self) -> &str;

    /// Ask for mitigation advice. Returns the raw reply text.
    async fn query(&self, prompt: &AdvicePrompt) -> Result<String, OracleError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl LlmBackend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4-turbo-preview",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown LLM backend '{other}', expected openai or anthropic")),
        }
    }
}

/// Configuration for creating an oracle.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Oracle stand-in used when no API key is configured.
///
/// Every query fails with [`OracleError::Unavailable`], so each detection is
/// dropped with a logged reason instead of silently producing nothing.
pub struct UnavailableOracle {
    reason: String,
}

impl UnavailableOracle {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AdviceOracle for UnavailableOracle {
    fn model_name(&self) -> &str {
        "unavailable"
    }

    async fn query(&self, _prompt: &AdvicePrompt) -> Result<String, OracleError> {
        Err(OracleError::Unavailable {
            reason: self.reason.clone(),
        })
    }
}

/// Create an oracle from configuration.
///
/// Must be called inside a Tokio runtime: building the agent spawns its tool server.
pub fn create_oracle(config: &LlmConfig) -> Result<Arc<dyn AdviceOracle>, OracleError> {
    match config.backend {
        LlmBackend::OpenAi => create_openai_oracle(config),
        LlmBackend::Anthropic => create_anthropic_oracle(config),
    }
}

fn create_openai_oracle(config: &LlmConfig) -> Result<Arc<dyn AdviceOracle>, OracleError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            OracleError::RequestFailed {
                provider: config.backend.label().to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(prompt::SYSTEM_PROMPT)
        .additional_params(serde_json::json!({
            "text": { "format": { "type": "json_object" } }
        }))
        .build();
    tracing::info!("Using OpenAI advice oracle (model: {})", config.model);
    Ok(Arc::new(RigOracle::new(agent, config.backend.label(), &config.model)))
}

fn create_anthropic_oracle(config: &LlmConfig) -> Result<Arc<dyn AdviceOracle>, OracleError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            OracleError::RequestFailed {
                provider: config.backend.label().to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(prompt::SYSTEM_PROMPT)
        .max_tokens(1024)
        .build();
    tracing::info!("Using Anthropic advice oracle (model: {})", config.model);
    Ok(Arc::new(RigOracle::new(agent, config.backend.label(), &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
        assert_eq!("anthropic".parse::<LlmBackend>().unwrap(), LlmBackend::Anthropic);
        assert!("ollama".parse::<LlmBackend>().is_err());
    }

    #[tokio::test]
    async fn create_openai_oracle_constructs_without_network() {
        // Clients accept any key at construction; auth fails on first request.
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        let oracle = create_oracle(&config).unwrap();
        assert_eq!(oracle.model_name(), "gpt-4o");
    }

    #[tokio::test]
    async fn create_anthropic_oracle_constructs_without_network() {
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
        };
        let oracle = create_oracle(&config).unwrap();
        assert_eq!(oracle.model_name(), "claude-3-5-sonnet-latest");
    }

    #[tokio::test]
    async fn unavailable_oracle_always_fails() {
        let oracle = UnavailableOracle::new("OPENAI_API_KEY is not set");
        let prompt = AdvicePrompt::new("Sector 1", 0, "Night", chrono::Utc::now());
        let err = oracle.query(&prompt).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
