//! # devbench-adapters
//!
//! Concrete executors for the devbench harness.
//!
//! This crate provides implementations of the `Executor` contract:
//! - Direct provider API calls (Anthropic, OpenAI chat, OpenAI responses, Google)
//! - CLI agents spawned as subprocesses (Claude Code, Gemini CLI, Codex CLI, custom)
//! - Project execution, where an agent edits a copy of a template project
//!
//! It also provides the provider-backed rubric judge and agent availability
//! checks.
//!
//! ## Factory
//!
//! `build_executors` turns a `BenchConfig` into the executor list the
//! orchestrator runs. API keys are read from the environment.

mod api_executor;
mod auto_detect;
mod cli_agent;
mod cli_executor;
mod factory;
mod judge;
mod project_executor;
mod providers;

pub use api_executor::ApiExecutor;
pub use auto_detect::{
    AgentAvailability, AgentStatus, VERSION_CHECK_TIMEOUT, check_agent, check_agents,
};
pub use cli_agent::{AgentUsage, CliAgent, CustomAgentError};
pub use cli_executor::CliExecutor;
pub use factory::{FactoryError, FactoryOptions, build_executors, build_executors_with};
pub use judge::ProviderJudge;
pub use project_executor::{ProjectExecutor, default_projects_root};
pub use providers::{
    Completion, CompletionRequest, DEFAULT_MAX_TOKENS, ProviderClient, ProviderEndpoint,
    api_key_var,
};
