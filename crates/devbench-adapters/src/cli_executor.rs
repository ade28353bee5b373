//! Executor that spawns a CLI agent and reads its answer from stdout.
//!
//! The prompt is written to a temporary file that the agent reads. The file
//! is a `NamedTempFile`, so it is removed on every exit path, including
//! deadline expiry and spawn failures.

use crate::cli_agent::CliAgent;
use crate::project_executor::ProjectExecutor;
use async_trait::async_trait;
use devbench_core::process::{self, CommandSpec, ProcessError, ProcessOutput};
use devbench_proto::{
    ExecutionError, ExecutionMode, ExecutionRequest, ExecutionResult, Executor, ExecutorInfo,
    TokensSource, estimate_tokens,
};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// stderr kept in process error messages.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Runs one prompt through a CLI agent in text mode.
///
/// Requests that carry a template or project directory are handed to the
/// attached [`ProjectExecutor`], so one configured agent serves both kinds of
/// task. Without one, such requests are answered in text like any other.
#[derive(Debug)]
pub struct CliExecutor {
    info: ExecutorInfo,
    agent: CliAgent,
    timeout: Duration,
    projects: Option<ProjectExecutor>,
}

impl CliExecutor {
    pub fn new(info: ExecutorInfo, agent: CliAgent, timeout: Duration) -> Self {
        Self {
            info,
            agent,
            timeout,
            projects: None,
        }
    }

    /// Routes project-bearing requests to `projects`.
    pub fn with_projects(mut self, projects: ProjectExecutor) -> Self {
        self.projects = Some(projects);
        self
    }

    pub fn agent(&self) -> &CliAgent {
        &self.agent
    }
}

#[async_trait]
impl Executor for CliExecutor {
    fn info(&self) -> &ExecutorInfo {
        &self.info
    }

    async fn execute(&self, request: &ExecutionRequest) -> devbench_proto::Result<ExecutionResult> {
        if request.template_dir.is_some() || request.project_dir.is_some() {
            if let Some(projects) = &self.projects {
                return projects.execute(request).await;
            }
            debug!(executor = %self.info.id, "No project support; answering in text");
        }

        let prompt_file = write_prompt_file(&request.prompt)?;
        let args = self.agent.build_args(prompt_file.path(), &request.prompt);
        let started = Instant::now();
        let output = spawn_agent(&self.info, &self.agent, args, None, self.timeout).await?;
        let latency = started.elapsed();

        let answer = read_answer(&self.info, &self.agent, &request.prompt, &output)?;
        Ok(ExecutionResult {
            content: answer.content,
            input_tokens: answer.input_tokens,
            output_tokens: answer.output_tokens,
            latency,
            tokens_source: answer.tokens_source,
            mode: ExecutionMode::Cli,
            model_id: self.info.model_id.clone(),
            project_dir: None,
        })
    }
}

/// Writes the prompt to a uniquely named temporary file.
pub(crate) fn write_prompt_file(prompt: &str) -> Result<NamedTempFile, ExecutionError> {
    let mut file = tempfile::Builder::new()
        .prefix("devbench-prompt-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(prompt.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Spawns the agent and waits for it under `timeout`.
pub(crate) async fn spawn_agent(
    info: &ExecutorInfo,
    agent: &CliAgent,
    args: Vec<String>,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ProcessOutput, ExecutionError> {
    let mut spec = CommandSpec::new(&agent.command).args(args);
    for (key, value) in &agent.env {
        spec = spec.env(key, value);
    }
    if let Some(cwd) = cwd {
        spec = spec.current_dir(cwd);
    }

    debug!(executor = %info.id, command = %agent.command, cwd = ?cwd, "Invoking CLI agent");
    process::run_with_deadline(&spec, timeout)
        .await
        .map_err(|err| match err {
            ProcessError::Timeout { after, .. } => {
                warn!(executor = %info.id, timeout_secs = after.as_secs(), "CLI agent timed out");
                ExecutionError::Timeout {
                    what: format!("CLI agent {}", info.id),
                    after,
                }
            }
            other => ExecutionError::Process(other.to_string()),
        })
}

/// Content and token accounting read from an agent's output.
#[derive(Debug)]
pub(crate) struct AgentAnswer {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tokens_source: TokensSource,
}

/// Interprets a finished agent process.
///
/// A failed exit that mentions throttling is reported as rate limiting. A
/// failed exit with nothing usable on stdout is a process error. Otherwise the
/// answer is kept even when the exit code was non-zero.
pub(crate) fn read_answer(
    info: &ExecutorInfo,
    agent: &CliAgent,
    prompt: &str,
    output: &ProcessOutput,
) -> Result<AgentAnswer, ExecutionError> {
    if !output.success() {
        if let Some(signal) = agent.rate_limit_signal(&output.stdout, &output.stderr) {
            return Err(ExecutionError::RateLimited {
                provider: info.provider.clone(),
                message: signal,
            });
        }
    }

    let content = agent.extract_content(&output.stdout);
    if !output.success() {
        if content.trim().is_empty() {
            let code = output
                .exit_code
                .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            return Err(ExecutionError::Process(format!(
                "{} exited with {code}: {}",
                agent.command,
                process::truncate(output.stderr.trim(), STDERR_EXCERPT_CHARS)
            )));
        }
        warn!(
            executor = %info.id,
            exit_code = ?output.exit_code,
            "CLI agent exited unsuccessfully; keeping its output"
        );
    }

    let answer = match agent.extract_usage(&output.stdout, &output.stderr) {
        Some(usage) => AgentAnswer {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            tokens_source: TokensSource::Exact,
            content,
        },
        None => AgentAnswer {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&content),
            tokens_source: TokensSource::Estimated,
            content,
        },
    };
    Ok(answer)
}
