//! Benchmark configuration.
//!
//! Loaded from `devbench.yml`. A minimal file only needs the executors:
//!
//! ```yaml
//! models:
//!   - id: sonnet
//!     provider: anthropic
//!     display_name: Claude Sonnet
//!     model_id: claude-sonnet-4-5
//!     pricing: { input_per_m_token: 3.0, output_per_m_token: 15.0 }
//! agents:
//!   - id: claude-code
//!     backend: claude
//!     display_name: Claude Code
//! ```

use devbench_proto::{Language, Pricing};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration for a benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Models called directly through provider APIs.
    #[serde(default)]
    pub models: Vec<ModelConfig>,

    /// CLI agents spawned as subprocesses.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub judge: JudgeConfig,
}

/// Hosted APIs the harness can call directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiProvider {
    Anthropic,
    Openai,
    /// OpenAI's Responses endpoint, for models not served by chat completions.
    OpenaiResponses,
    Google,
}

impl ApiProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiProvider::Anthropic => "anthropic",
            ApiProvider::Openai => "openai",
            ApiProvider::OpenaiResponses => "openai-responses",
            ApiProvider::Google => "google",
        }
    }
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub provider: ApiProvider,
    pub display_name: String,
    /// Identifier sent to the provider.
    pub model_id: String,
    #[serde(default)]
    pub pricing: Pricing,
}

/// CLI agents with built-in argument and output handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackend {
    Claude,
    Gemini,
    Codex,
    /// Any other binary; requires `command`.
    Custom,
}

impl AgentBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentBackend::Claude => "claude",
            AgentBackend::Gemini => "gemini",
            AgentBackend::Codex => "codex",
            AgentBackend::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub backend: AgentBackend,
    pub display_name: String,

    /// Concurrency key; defaults to `cli-<backend>`.
    #[serde(default)]
    pub provider: Option<String>,

    /// Pricing applied to estimated token counts.
    #[serde(default)]
    pub estimated_pricing: Pricing,

    /// Deadline for a text-mode invocation.
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,

    /// Deadline when the agent edits a project tree.
    #[serde(default = "default_agentic_timeout")]
    pub agentic_timeout_seconds: u64,

    /// Binary override (required for `custom`).
    #[serde(default)]
    pub command: Option<String>,

    /// Argument template for `custom`; `{prompt_file}` is substituted.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the spawned process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_agentic_timeout() -> u64 {
    300
}

impl AgentConfig {
    pub fn provider_key(&self) -> String {
        self.provider
            .clone()
            .unwrap_or_else(|| format!("cli-{}", self.backend.as_str()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn agentic_timeout(&self) -> Duration {
        Duration::from_secs(self.agentic_timeout_seconds)
    }
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default = "default_runs_per_combo")]
    pub runs_per_combo: u32,

    /// In-flight combinations allowed per provider.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Languages to benchmark; tasks are intersected with this list.
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,

    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Global cap on retry turns, applied on top of each task's own limit.
    #[serde(default)]
    pub max_turns: Option<u32>,

    /// Attempts per turn when the provider reports rate limiting.
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,

    #[serde(default = "default_rate_limit_base_delay_ms")]
    pub rate_limit_base_delay_ms: u64,
}

fn default_runs_per_combo() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_languages() -> Vec<Language> {
    Language::ALL.to_vec()
}

fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_rate_limit_attempts() -> u32 {
    3
}

fn default_rate_limit_base_delay_ms() -> u64 {
    1000
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            runs_per_combo: default_runs_per_combo(),
            max_concurrent: default_max_concurrent(),
            max_output_tokens: default_max_output_tokens(),
            temperature: 0.0,
            languages: default_languages(),
            fixtures_dir: default_fixtures_dir(),
            output_dir: default_output_dir(),
            max_turns: None,
            rate_limit_attempts: default_rate_limit_attempts(),
            rate_limit_base_delay_ms: default_rate_limit_base_delay_ms(),
        }
    }
}

/// The model used to score rubric tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_judge_provider")]
    pub provider: ApiProvider,
    #[serde(default = "default_judge_model")]
    pub model_id: String,
    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u32,
}

fn default_judge_provider() -> ApiProvider {
    ApiProvider::Anthropic
}

fn default_judge_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_judge_max_tokens() -> u32 {
    1024
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: default_judge_provider(),
            model_id: default_judge_model(),
            max_tokens: default_judge_max_tokens(),
        }
    }
}

impl BenchConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse_yaml(&content)?;
        debug!(
            path = %path.display(),
            models = config.models.len(),
            agents = config.agents.len(),
            runs_per_combo = config.run.runs_per_combo,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `MAX_OUTPUT_TOKENS`, `JUDGE_MODEL_ID`, and `RESULTS_DIR`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("MAX_OUTPUT_TOKENS") {
            match value.trim().parse() {
                Ok(tokens) => {
                    debug!(max_output_tokens = tokens, "Override from MAX_OUTPUT_TOKENS");
                    self.run.max_output_tokens = tokens;
                }
                Err(_) => debug!(value = %value, "Ignoring non-numeric MAX_OUTPUT_TOKENS"),
            }
        }
        if let Some(model) = lookup("JUDGE_MODEL_ID").filter(|v| !v.trim().is_empty()) {
            debug!(judge_model = %model, "Override from JUDGE_MODEL_ID");
            self.judge.model_id = model;
        }
        if let Some(dir) = lookup("RESULTS_DIR").filter(|v| !v.trim().is_empty()) {
            debug!(output_dir = %dir, "Override from RESULTS_DIR");
            self.run.output_dir = PathBuf::from(dir);
        }
    }

    /// Validates the configuration.
    ///
    /// Returns hard errors for values that would make the run meaningless and
    /// warnings for suspicious but usable settings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        if self.run.runs_per_combo == 0 {
            return Err(ConfigError::InvalidValue {
                field: "run.runs_per_combo".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.run.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "run.max_concurrent".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.run.max_turns == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "run.max_turns".to_string(),
                message: "must be at least 1 when set".to_string(),
            });
        }
        if self.run.rate_limit_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "run.rate_limit_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.run.languages.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "run.languages".to_string(),
                message: "at least one language is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let ids = self
            .models
            .iter()
            .map(|m| m.id.as_str())
            .chain(self.agents.iter().map(|a| a.id.as_str()));
        for id in ids {
            if id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "id".to_string(),
                    message: "executor ids must not be empty".to_string(),
                });
            }
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateExecutor(id.to_string()));
            }
        }

        for agent in &self.agents {
            if agent.backend == AgentBackend::Custom && agent.command.is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("agents.{}.command", agent.id),
                    message: "custom agents need a command".to_string(),
                });
            }
            if agent.timeout_seconds == 0 || agent.agentic_timeout_seconds == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("agents.{}.timeout_seconds", agent.id),
                    message: "timeouts must be positive".to_string(),
                });
            }
            if agent.estimated_pricing == Pricing::default() {
                warnings.push(ConfigWarning::ZeroPricing(agent.id.clone()));
            }
        }

        for model in &self.models {
            if model.pricing == Pricing::default() {
                warnings.push(ConfigWarning::ZeroPricing(model.id.clone()));
            }
        }

        if self.models.is_empty() && self.agents.is_empty() {
            warnings.push(ConfigWarning::NoExecutors);
        }

        Ok(warnings)
    }
}

/// Non-fatal configuration findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Costs for this executor will always be zero.
    ZeroPricing(String),
    /// Nothing to benchmark.
    NoExecutors,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::ZeroPricing(id) => {
                write!(f, "Executor '{id}' has no pricing; costs will be reported as 0")
            }
            ConfigWarning::NoExecutors => write!(f, "No models or agents are configured"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("executor id '{0}' is defined more than once")]
    DuplicateExecutor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.run.runs_per_combo, 3);
        assert_eq!(config.run.max_concurrent, 3);
        assert_eq!(config.run.max_output_tokens, 4096);
        assert_eq!(config.run.languages, Language::ALL.to_vec());
        assert_eq!(config.judge.model_id, "claude-haiku-4-5-20251001");
        assert_eq!(config.judge.provider, ApiProvider::Anthropic);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
models:
  - id: gpt
    provider: openai-responses
    display_name: GPT
    model_id: gpt-5
    pricing: { input_per_m_token: 1.25, output_per_m_token: 10.0 }
agents:
  - id: claude-code
    backend: claude
    display_name: Claude Code
    estimated_pricing: { input_per_m_token: 3.0, output_per_m_token: 15.0 }
  - id: aider
    backend: custom
    display_name: Aider
    provider: cli-aider
    command: aider
    args: ["--message-file", "{prompt_file}"]
    timeout_seconds: 60
run:
  runs_per_combo: 1
  max_concurrent: 2
  languages: [nodejs]
  max_turns: 2
"#;
        let config = BenchConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.models[0].provider, ApiProvider::OpenaiResponses);
        assert_eq!(config.agents[0].provider_key(), "cli-claude");
        assert_eq!(config.agents[0].timeout(), Duration::from_secs(120));
        assert_eq!(config.agents[0].agentic_timeout(), Duration::from_secs(300));
        assert_eq!(config.agents[1].provider_key(), "cli-aider");
        assert_eq!(config.agents[1].args, vec!["--message-file", "{prompt_file}"]);
        assert_eq!(config.run.languages, vec![Language::Nodejs]);
        assert_eq!(config.run.max_turns, Some(2));
        assert_eq!(config.run.rate_limit_attempts, 3);
        assert_eq!(
            config.validate().unwrap(),
            vec![ConfigWarning::ZeroPricing("aider".to_string())]
        );
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let yaml = r#"
models:
  - id: x
    provider: acme
    display_name: X
    model_id: x-1
"#;
        assert!(matches!(
            BenchConfig::parse_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
models:
  - { id: dup, provider: google, display_name: A, model_id: a }
agents:
  - { id: dup, backend: gemini, display_name: B }
"#;
        let config = BenchConfig::parse_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateExecutor(id)) if id == "dup"
        ));
    }

    #[test]
    fn test_zero_runs_rejected() {
        let mut config = BenchConfig::default();
        config.run.runs_per_combo = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.run.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_agent_requires_command() {
        let yaml = "agents:\n  - { id: x, backend: custom, display_name: X }\n";
        let config = BenchConfig::parse_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "agents.x.command"
        ));
    }

    #[test]
    fn test_warnings() {
        let yaml = "models:\n  - { id: free, provider: anthropic, display_name: F, model_id: f }\n";
        let warnings = BenchConfig::parse_yaml(yaml).unwrap().validate().unwrap();
        assert_eq!(warnings, vec![ConfigWarning::ZeroPricing("free".to_string())]);

        let warnings = BenchConfig::default().validate().unwrap();
        assert_eq!(warnings, vec![ConfigWarning::NoExecutors]);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BenchConfig::default();
        config.apply_overrides_from(|key| match key {
            "MAX_OUTPUT_TOKENS" => Some("8192".to_string()),
            "JUDGE_MODEL_ID" => Some("judge-x".to_string()),
            "RESULTS_DIR" => Some("/tmp/out".to_string()),
            _ => None,
        });
        assert_eq!(config.run.max_output_tokens, 8192);
        assert_eq!(config.judge.model_id, "judge-x");
        assert_eq!(config.run.output_dir, PathBuf::from("/tmp/out"));

        let mut config = BenchConfig::default();
        config.apply_overrides_from(|key| (key == "MAX_OUTPUT_TOKENS").then(|| "lots".to_string()));
        assert_eq!(config.run.max_output_tokens, 4096);
    }

    #[test]
    fn test_from_file_missing() {
        let err = BenchConfig::from_file("/nonexistent/devbench.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
