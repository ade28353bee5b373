//! Rubric judge backed by a hosted model.

use crate::providers::{CompletionRequest, ProviderClient, ProviderEndpoint};
use anyhow::Context;
use async_trait::async_trait;
use devbench_core::JudgeConfig;
use devbench_core::evaluation::rubric::{
    JudgeRequest, RubricJudge, RubricVerdict, build_judge_prompt, parse_judge_reply,
};
use tracing::debug;

/// Sends the judge prompt to one model at temperature 0 and parses its JSON verdict.
#[derive(Debug, Clone)]
pub struct ProviderJudge {
    client: ProviderClient,
    max_tokens: u32,
}

impl ProviderJudge {
    pub fn new(client: ProviderClient, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    /// Builds the judge from configuration, reading credentials from the environment.
    pub fn from_config(config: &JudgeConfig) -> anyhow::Result<Self> {
        let endpoint = ProviderEndpoint::from_env(config.provider);
        let client = ProviderClient::new(config.provider, config.model_id.clone(), endpoint)
            .context("failed to set up the judge client")?;
        Ok(Self::new(client, config.max_tokens))
    }
}

#[async_trait]
impl RubricJudge for ProviderJudge {
    async fn judge(&self, request: &JudgeRequest<'_>) -> anyhow::Result<RubricVerdict> {
        let prompt = build_judge_prompt(request);
        let completion = self
            .client
            .complete(&CompletionRequest {
                system: None,
                prompt: &prompt,
                max_tokens: self.max_tokens,
                temperature: 0.0,
            })
            .await
            .with_context(|| format!("judge call for {} failed", request.task_id))?;

        debug!(
            task = request.task_id,
            judge = %self.client.model(),
            output_tokens = completion.output_tokens,
            "Judge replied"
        );
        parse_judge_reply(&completion.content, request.criteria)
    }
}
