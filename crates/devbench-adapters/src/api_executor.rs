//! Executor that calls a hosted model API directly.

use crate::providers::{CompletionRequest, DEFAULT_MAX_TOKENS, ProviderClient};
use async_trait::async_trait;
use devbench_proto::{
    ExecutionMode, ExecutionRequest, ExecutionResult, Executor, ExecutorInfo, TokensSource,
};
use std::time::Instant;
use tracing::debug;

/// Forwards each request to one provider model. Token counts are always exact.
#[derive(Debug)]
pub struct ApiExecutor {
    info: ExecutorInfo,
    client: ProviderClient,
}

impl ApiExecutor {
    pub fn new(mut info: ExecutorInfo, client: ProviderClient) -> Self {
        info.mode = ExecutionMode::Api;
        Self { info, client }
    }
}

#[async_trait]
impl Executor for ApiExecutor {
    fn info(&self) -> &ExecutorInfo {
        &self.info
    }

    async fn execute(&self, request: &ExecutionRequest) -> devbench_proto::Result<ExecutionResult> {
        if request.template_dir.is_some() {
            debug!(executor = %self.info.id, "Project template ignored; answering in text");
        }

        let completion_request = CompletionRequest {
            system: request.system_prompt.as_deref(),
            prompt: &request.prompt,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature.unwrap_or(0.0),
        };

        let started = Instant::now();
        let completion = self.client.complete(&completion_request).await?;
        let latency = started.elapsed();
        debug!(
            executor = %self.info.id,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            latency_ms = latency.as_millis() as u64,
            "Provider call completed"
        );

        Ok(ExecutionResult {
            content: completion.content,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            latency,
            tokens_source: TokensSource::Exact,
            mode: ExecutionMode::Api,
            model_id: completion.model,
            project_dir: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderEndpoint;
    use devbench_core::ApiProvider;
    use devbench_proto::Pricing;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn info() -> ExecutorInfo {
        ExecutorInfo {
            id: "gpt".to_string(),
            provider: "openai".to_string(),
            display_name: "GPT".to_string(),
            model_id: "gpt-x".to_string(),
            mode: ExecutionMode::Cli,
            pricing: Pricing::new(1.0, 2.0),
        }
    }

    #[tokio::test]
    async fn test_execute_reports_exact_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "max_tokens": 256,
                "temperature": 0.5,
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "prompt" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-x-0613",
                "choices": [{ "message": { "content": "answer" } }],
                "usage": { "prompt_tokens": 11, "completion_tokens": 3 }
            })))
            .mount(&server)
            .await;
        let client = ProviderClient::new(
            ApiProvider::Openai,
            "gpt-x",
            ProviderEndpoint::new(server.uri(), "k"),
        )
        .unwrap();
        let executor = ApiExecutor::new(info(), client);
        assert_eq!(executor.info().mode, ExecutionMode::Api);

        let request = ExecutionRequest::new("prompt")
            .with_system_prompt(Some("sys".to_string()))
            .with_limits(Some(256), Some(0.5));
        let result = executor.execute(&request).await.unwrap();
        assert_eq!(result.content, "answer");
        assert_eq!(result.total_tokens(), 14);
        assert_eq!(result.tokens_source, TokensSource::Exact);
        assert_eq!(result.model_id, "gpt-x-0613");
        assert!(result.project_dir.is_none());
    }
}
