//! rig-core backed oracle.

use async_trait::async_trait;
use rig::agent::Agent;
use rig::completion::{CompletionModel, Prompt};

use super::{AdviceOracle, AdvicePrompt};
use crate::error::OracleError;

/// Oracle backed by a rig agent preconfigured with the system preamble.
pub struct RigOracle<M: CompletionModel> {
    agent: Agent<M>,
    provider: &'static str,
    model_name: String,
}

impl<M: CompletionModel> RigOracle<M> {
    pub fn new(agent: Agent<M>, provider: &'static str, model_name: &str) -> Self {
        Self {
            agent,
            provider,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> AdviceOracle for RigOracle<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn query(&self, prompt: &AdvicePrompt) -> Result<String, OracleError> {
        let reply: String = self
            .agent
            .prompt(prompt.user_prompt())
            .await
            .map_err(|e| OracleError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;

        if reply.trim().is_empty() {
            return Err(OracleError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "empty completion".to_string(),
            });
        }
        Ok(reply)
    }
}
