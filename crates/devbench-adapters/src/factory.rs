//! Builds the configured executors.

use crate::api_executor::ApiExecutor;
use crate::cli_agent::CliAgent;
use crate::cli_executor::CliExecutor;
use crate::project_executor::{ProjectExecutor, default_projects_root};
use crate::providers::{ProviderClient, ProviderEndpoint, api_key_var};
use devbench_core::{AgentConfig, BenchConfig, ModelConfig};
use devbench_proto::{ExecutionError, ExecutionMode, Executor, ExecutorInfo};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Errors raised while turning configuration into executors.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("agent '{0}' uses the custom backend but has no command")]
    MissingCommand(String),

    #[error("failed to set up model '{id}': {source}")]
    Client {
        id: String,
        #[source]
        source: ExecutionError,
    },

    #[error("unknown executor ids: {}", .0.join(", "))]
    UnknownExecutors(Vec<String>),
}

/// Knobs that do not come from the configuration file.
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    /// Parent directory for lifecycle project copies.
    pub projects_root: PathBuf,
    /// Restricts the result to these executor ids, in configuration order.
    pub only: Option<Vec<String>>,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            only: None,
        }
    }
}

/// Builds every executor, reading API credentials from the environment.
pub fn build_executors(
    config: &BenchConfig,
    options: &FactoryOptions,
) -> Result<Vec<Arc<dyn Executor>>, FactoryError> {
    build_executors_with(config, options, |key| std::env::var(key).ok())
}

/// [`build_executors`] with an explicit environment lookup.
///
/// Models without an API key are still built; their calls fail as
/// misconfigured, which keeps `plan` usable without credentials.
pub fn build_executors_with(
    config: &BenchConfig,
    options: &FactoryOptions,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<Arc<dyn Executor>>, FactoryError> {
    let selected = |id: &str| {
        options
            .only
            .as_ref()
            .is_none_or(|only| only.iter().any(|o| o == id))
    };

    if let Some(only) = &options.only {
        let known: HashSet<&str> = config
            .models
            .iter()
            .map(|m| m.id.as_str())
            .chain(config.agents.iter().map(|a| a.id.as_str()))
            .collect();
        let unknown: Vec<String> = only
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(FactoryError::UnknownExecutors(unknown));
        }
    }

    let mut executors: Vec<Arc<dyn Executor>> = Vec::new();
    for model in config.models.iter().filter(|m| selected(&m.id)) {
        executors.push(Arc::new(api_executor(model, &lookup)?));
    }
    for agent in config.agents.iter().filter(|a| selected(&a.id)) {
        executors.push(Arc::new(cli_executor(agent, options)?));
    }

    debug!(count = executors.len(), "Executors built");
    Ok(executors)
}

fn api_executor(
    model: &ModelConfig,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<ApiExecutor, FactoryError> {
    let endpoint = ProviderEndpoint::from_lookup(model.provider, lookup);
    if !endpoint.has_key() {
        warn!(
            model = %model.id,
            "{} is not set; calls to this model will fail",
            api_key_var(model.provider)
        );
    }
    let client = ProviderClient::new(model.provider, model.model_id.clone(), endpoint).map_err(
        |source| FactoryError::Client {
            id: model.id.clone(),
            source,
        },
    )?;

    let info = ExecutorInfo {
        id: model.id.clone(),
        provider: model.provider.to_string(),
        display_name: model.display_name.clone(),
        model_id: model.model_id.clone(),
        mode: ExecutionMode::Api,
        pricing: model.pricing,
    };
    Ok(ApiExecutor::new(info, client))
}

fn cli_executor(agent: &AgentConfig, options: &FactoryOptions) -> Result<CliExecutor, FactoryError> {
    let cli = CliAgent::from_config(agent).map_err(|_| FactoryError::MissingCommand(agent.id.clone()))?;
    let info = ExecutorInfo {
        id: agent.id.clone(),
        provider: agent.provider_key(),
        display_name: agent.display_name.clone(),
        model_id: format!("{}-agent", agent.id),
        mode: ExecutionMode::Cli,
        pricing: agent.estimated_pricing,
    };

    let projects = ProjectExecutor::new(
        info.clone(),
        cli.clone(),
        agent.agentic_timeout(),
        options.projects_root.clone(),
    );
    Ok(CliExecutor::new(info, cli, agent.timeout()).with_projects(projects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbench_proto::Pricing;

    const CONFIG: &str = r#"
models:
  - id: sonnet
    provider: anthropic
    display_name: Claude Sonnet
    model_id: claude-sonnet-4-5
    pricing: { input_per_m_token: 3.0, output_per_m_token: 15.0 }
  - id: flash
    provider: google
    display_name: Gemini Flash
    model_id: gemini-2.5-flash
agents:
  - id: claude-code
    backend: claude
    display_name: Claude Code
  - id: aider
    backend: custom
    display_name: Aider
    command: aider
"#;

    fn options(only: Option<&[&str]>) -> FactoryOptions {
        FactoryOptions {
            projects_root: std::env::temp_dir().join("devbench-factory-test"),
            only: only.map(|ids| ids.iter().map(|s| (*s).to_string()).collect()),
        }
    }

    #[test]
    fn test_builds_models_then_agents() {
        let config = BenchConfig::parse_yaml(CONFIG).unwrap();
        let executors = build_executors_with(&config, &options(None), |_| None).unwrap();
        let summary: Vec<_> = executors
            .iter()
            .map(|e| {
                let info = e.info();
                (info.id.as_str(), info.provider.as_str(), info.mode)
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("sonnet", "anthropic", ExecutionMode::Api),
                ("flash", "google", ExecutionMode::Api),
                ("claude-code", "cli-claude", ExecutionMode::Cli),
                ("aider", "cli-custom", ExecutionMode::Cli),
            ]
        );
        assert_eq!(executors[0].info().pricing, Pricing::new(3.0, 15.0));
        assert_eq!(executors[2].info().model_id, "claude-code-agent");
    }

    #[test]
    fn test_selection() {
        let config = BenchConfig::parse_yaml(CONFIG).unwrap();
        let executors =
            build_executors_with(&config, &options(Some(&["aider", "sonnet"])), |_| None).unwrap();
        let ids: Vec<_> = executors.iter().map(|e| e.info().id.clone()).collect();
        assert_eq!(ids, vec!["sonnet", "aider"]);

        let err = build_executors_with(&config, &options(Some(&["nope"])), |_| None).err().expect("expected error");
        assert!(matches!(err, FactoryError::UnknownExecutors(ids) if ids == vec!["nope"]));
    }

    #[test]
    fn test_custom_without_command_is_rejected() {
        let config =
            BenchConfig::parse_yaml("agents:\n  - { id: x, backend: custom, display_name: X }\n")
                .unwrap();
        let err = build_executors_with(&config, &options(None), |_| None).err().expect("expected error");
        assert!(matches!(err, FactoryError::MissingCommand(id) if id == "x"));
    }
}
