//! The executor contract: one prompt in, one response out.

use crate::error::Result;
use crate::pricing::Pricing;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Direct provider API call.
    Api,
    /// Spawned CLI agent returning text.
    Cli,
    /// CLI agent editing a copied project tree.
    Project,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Api => "api",
            ExecutionMode::Cli => "cli",
            ExecutionMode::Project => "project",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of token counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokensSource {
    /// Reported by the provider's own usage accounting.
    Exact,
    /// Derived from character counts.
    #[default]
    Estimated,
}

impl TokensSource {
    /// Combines provenance across turns: any estimate taints the total.
    #[must_use]
    pub fn merge(self, other: TokensSource) -> TokensSource {
        if self == TokensSource::Exact && other == TokensSource::Exact {
            TokensSource::Exact
        } else {
            TokensSource::Estimated
        }
    }
}

/// Identity and pricing of a configured executor.
///
/// The `provider` string is the concurrency key: every executor sharing a
/// provider shares one in-flight limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub model_id: String,
    pub mode: ExecutionMode,
    pub pricing: Pricing,
}

/// One attempt's input.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Prompt built by the task (identical across executor kinds).
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Template project to copy before the first turn of a lifecycle task.
    pub template_dir: Option<PathBuf>,
    /// Project directory from an earlier turn, reused so edits accumulate.
    pub project_dir: Option<PathBuf>,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_limits(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// One attempt's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub tokens_source: TokensSource,
    pub mode: ExecutionMode,
    /// Model identifier as reported by the provider (or the agent id).
    pub model_id: String,
    /// Project tree the agent worked in, for lifecycle executions.
    pub project_dir: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Uniform contract over direct API calls, CLI agents, and project agents.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Identity used for grouping, concurrency limits, and pricing.
    fn info(&self) -> &ExecutorInfo;

    /// Produces a response for one turn.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult>;
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
