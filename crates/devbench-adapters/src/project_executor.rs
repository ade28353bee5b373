//! Executor that lets a CLI agent edit a copy of a template project.
//!
//! The first turn copies the request's template into a fresh directory under
//! the projects root. Later turns receive that directory back and reuse it,
//! so the agent's edits accumulate. Removing the directory is the caller's
//! job once the combination is finished.

use crate::cli_agent::CliAgent;
use crate::cli_executor::{read_answer, spawn_agent, write_prompt_file};
use async_trait::async_trait;
use devbench_core::copy_tree;
use devbench_proto::{
    ExecutionError, ExecutionMode, ExecutionRequest, ExecutionResult, Executor, ExecutorInfo,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static NEXT_PROJECT: AtomicU64 = AtomicU64::new(0);

/// Default parent directory for project copies.
pub fn default_projects_root() -> PathBuf {
    std::env::temp_dir().join("devbench-projects")
}

/// Runs a CLI agent with its working directory set to a project tree.
#[derive(Debug, Clone)]
pub struct ProjectExecutor {
    info: ExecutorInfo,
    agent: CliAgent,
    timeout: Duration,
    projects_root: PathBuf,
}

impl ProjectExecutor {
    pub fn new(
        mut info: ExecutorInfo,
        agent: CliAgent,
        timeout: Duration,
        projects_root: impl Into<PathBuf>,
    ) -> Self {
        info.mode = ExecutionMode::Project;
        Self {
            info,
            agent,
            timeout,
            projects_root: projects_root.into(),
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// Copies `template` into a new, uniquely named directory.
    async fn prepare(&self, template: &Path) -> Result<PathBuf, ExecutionError> {
        if !template.is_dir() {
            return Err(ExecutionError::Config(format!(
                "template project {} does not exist",
                template.display()
            )));
        }
        tokio::fs::create_dir_all(&self.projects_root).await?;

        let target = loop {
            let candidate = self.projects_root.join(format!(
                "{}-{}-{}",
                self.info.id,
                std::process::id(),
                NEXT_PROJECT.fetch_add(1, Ordering::Relaxed)
            ));
            if !candidate.exists() {
                break candidate;
            }
        };

        let (src, dst) = (template.to_path_buf(), target.clone());
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| ExecutionError::Process(format!("project copy task failed: {e}")))?;
        if let Err(err) = copied {
            remove_project(&target).await;
            return Err(err.into());
        }

        debug!(
            executor = %self.info.id,
            template = %template.display(),
            project = %target.display(),
            "Copied template project"
        );
        Ok(target)
    }

    async fn run_in(
        &self,
        request: &ExecutionRequest,
        project_dir: &Path,
    ) -> devbench_proto::Result<ExecutionResult> {
        let prompt_file = write_prompt_file(&request.prompt)?;
        let args = self
            .agent
            .build_project_args(prompt_file.path(), &request.prompt);
        let started = Instant::now();
        let output = spawn_agent(&self.info, &self.agent, args, Some(project_dir), self.timeout)
            .await?;
        let latency = started.elapsed();

        let answer = read_answer(&self.info, &self.agent, &request.prompt, &output)?;
        info!(
            executor = %self.info.id,
            project = %project_dir.display(),
            latency_ms = latency.as_millis() as u64,
            "Agent finished editing project"
        );
        Ok(ExecutionResult {
            content: answer.content,
            input_tokens: answer.input_tokens,
            output_tokens: answer.output_tokens,
            latency,
            tokens_source: answer.tokens_source,
            mode: ExecutionMode::Project,
            model_id: self.info.model_id.clone(),
            project_dir: Some(project_dir.to_path_buf()),
        })
    }
}

#[async_trait]
impl Executor for ProjectExecutor {
    fn info(&self) -> &ExecutorInfo {
        &self.info
    }

    async fn execute(&self, request: &ExecutionRequest) -> devbench_proto::Result<ExecutionResult> {
        if let Some(existing) = &request.project_dir {
            return self.run_in(request, existing).await;
        }
        let Some(template) = &request.template_dir else {
            return Err(ExecutionError::Config(
                "project execution needs a template or an existing project directory".to_string(),
            ));
        };

        let project_dir = self.prepare(template).await?;
        let result = self.run_in(request, &project_dir).await;
        if result.is_err() {
            // The caller never learns about a directory created by a failed first turn.
            remove_project(&project_dir).await;
        }
        result
    }
}

async fn remove_project(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        warn!(project = %dir.display(), error = %err, "Failed to remove project directory");
    }
}
