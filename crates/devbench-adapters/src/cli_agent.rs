//! Invocation and output rules for each supported CLI agent.

use devbench_core::{AgentBackend, AgentConfig};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// Placeholder replaced by the prompt file path in custom argument templates.
pub const PROMPT_FILE_PLACEHOLDER: &str = "{prompt_file}";

/// Placeholder replaced by the prompt text itself.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Prompts longer than this are passed by reference to the prompt file.
pub const INLINE_PROMPT_LIMIT: usize = 7000;

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[ _-]?limit|\b429\b|resource_exhausted|quota exceeded|too many requests|overloaded")
        .expect("rate limit pattern is valid")
});

/// Token usage reported by the agent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Error when creating a custom agent without a command.
#[derive(Debug, Clone)]
pub struct CustomAgentError;

impl fmt::Display for CustomAgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "custom agent requires a command to be specified")
    }
}

impl std::error::Error for CustomAgentError {}

/// How one agent binary is invoked and how its output is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliAgent {
    pub backend: AgentBackend,
    /// The binary to execute.
    pub command: String,
    /// Argument template, only used by custom agents.
    pub args: Vec<String>,
    /// Extra environment for the spawned process.
    pub env: BTreeMap<String, String>,
}

impl CliAgent {
    /// Creates an agent from configuration.
    ///
    /// # Errors
    /// Returns `CustomAgentError` if the backend is `custom` but no command is given.
    pub fn from_config(config: &AgentConfig) -> Result<Self, CustomAgentError> {
        let mut agent = match config.backend {
            AgentBackend::Claude => Self::claude(),
            AgentBackend::Gemini => Self::gemini(),
            AgentBackend::Codex => Self::codex(),
            AgentBackend::Custom => {
                let command = config.command.clone().ok_or(CustomAgentError)?;
                Self::custom(command, config.args.clone())
            }
        };
        if let Some(command) = &config.command {
            agent.command.clone_from(command);
        }
        agent.env = config.env.clone();
        Ok(agent)
    }

    /// Claude Code in print mode with JSON output, which carries usage.
    pub fn claude() -> Self {
        Self::builtin(AgentBackend::Claude, "claude")
    }

    /// Gemini CLI with JSON output.
    pub fn gemini() -> Self {
        Self::builtin(AgentBackend::Gemini, "gemini")
    }

    /// Codex CLI. Reports no usage, so tokens are always estimated.
    pub fn codex() -> Self {
        Self::builtin(AgentBackend::Codex, "codex")
    }

    /// Any other binary, driven by an argument template.
    ///
    /// `{prompt_file}` and `{prompt}` are substituted in every argument. When
    /// neither appears, the prompt file path is appended.
    pub fn custom(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            backend: AgentBackend::Custom,
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    fn builtin(backend: AgentBackend, command: &str) -> Self {
        Self {
            backend,
            command: command.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Arguments for a text-mode invocation. Built-in agents run headless
    /// without edit permissions.
    pub fn build_args(&self, prompt_file: &Path, prompt: &str) -> Vec<String> {
        let prompt_arg = inline_prompt(prompt_file, prompt);
        match self.backend {
            AgentBackend::Claude | AgentBackend::Gemini => {
                args(&["--output-format", "json", "-p"], prompt_arg)
            }
            AgentBackend::Codex => args(&["exec"], prompt_arg),
            AgentBackend::Custom => self.substitute(prompt_file, prompt),
        }
    }

    /// Arguments for an invocation that edits the project in its working directory.
    pub fn build_project_args(&self, prompt_file: &Path, prompt: &str) -> Vec<String> {
        let prompt_arg = inline_prompt(prompt_file, prompt);
        match self.backend {
            AgentBackend::Claude => args(
                &["--dangerously-skip-permissions", "--output-format", "json", "-p"],
                prompt_arg,
            ),
            AgentBackend::Gemini => args(&["--yolo", "--output-format", "json", "-p"], prompt_arg),
            AgentBackend::Codex => args(&["exec", "--full-auto"], prompt_arg),
            AgentBackend::Custom => self.substitute(prompt_file, prompt),
        }
    }

    fn substitute(&self, prompt_file: &Path, prompt: &str) -> Vec<String> {
        let file = prompt_file.display().to_string();
        let uses_placeholder = self
            .args
            .iter()
            .any(|a| a.contains(PROMPT_FILE_PLACEHOLDER) || a.contains(PROMPT_PLACEHOLDER));

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(PROMPT_FILE_PLACEHOLDER, &file)
                    .replace(PROMPT_PLACEHOLDER, prompt)
            })
            .collect();
        if !uses_placeholder {
            args.push(file);
        }
        args
    }

    /// Extracts the answer from raw stdout.
    ///
    /// Terminal escapes are stripped first. Structured output falls back to the
    /// raw text when it does not parse or lacks the expected field.
    pub fn extract_content(&self, stdout: &str) -> String {
        let clean = strip_ansi(stdout);
        match self.backend {
            AgentBackend::Claude => parse_json(&clean)
                .and_then(|v| {
                    v.get("result")
                        .or_else(|| v.get("content"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(clean),
            AgentBackend::Gemini => parse_json(&clean)
                .and_then(|v| {
                    v.pointer("/candidates/0/content/parts/0/text")
                        .or_else(|| v.get("response"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(clean),
            AgentBackend::Codex | AgentBackend::Custom => clean.trim().to_string(),
        }
    }

    /// Usage accounting from the agent's own output, when it reports any.
    ///
    /// The JSON result is looked for on stdout first, then on stderr.
    pub fn extract_usage(&self, stdout: &str, stderr: &str) -> Option<AgentUsage> {
        let (usage, input, output) = match self.backend {
            AgentBackend::Claude => ("usage", "input_tokens", "output_tokens"),
            AgentBackend::Gemini => ("usageMetadata", "promptTokenCount", "candidatesTokenCount"),
            AgentBackend::Codex | AgentBackend::Custom => return None,
        };
        let usage = [stdout, stderr]
            .into_iter()
            .filter_map(|stream| parse_json(&strip_ansi(stream)))
            .find_map(|parsed| parsed.get(usage).cloned())?;
        Some(AgentUsage {
            input_tokens: usage.get(input).and_then(Value::as_u64).unwrap_or(0),
            output_tokens: usage.get(output).and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// The first output line indicating the provider throttled the agent.
    pub fn rate_limit_signal(&self, stdout: &str, stderr: &str) -> Option<String> {
        stderr
            .lines()
            .chain(stdout.lines())
            .find(|line| RATE_LIMIT_RE.is_match(line))
            .map(|line| strip_ansi(line).trim().to_string())
    }
}

/// The prompt itself, or a pointer to the prompt file when it is too long
/// for a command line.
fn inline_prompt(prompt_file: &Path, prompt: &str) -> String {
    if prompt.len() > INLINE_PROMPT_LIMIT {
        format!(
            "Please read and execute the task in {}",
            prompt_file.display()
        )
    } else {
        prompt.to_string()
    }
}

fn args(flags: &[&str], prompt: String) -> Vec<String> {
    flags
        .iter()
        .map(|f| (*f).to_string())
        .chain(std::iter::once(prompt))
        .collect()
}

fn strip_ansi(text: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(text.as_bytes())).into_owned()
}

fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}
