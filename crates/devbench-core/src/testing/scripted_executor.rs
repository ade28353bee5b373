//! Executor that replays scripted replies and records call timing.

use async_trait::async_trait;
use devbench_proto::{
    ExecutionError, ExecutionMode, ExecutionRequest, ExecutionResult, Executor, ExecutorInfo,
    Pricing, TokensSource,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Tokens reported per call.
pub const SCRIPTED_INPUT_TOKENS: u64 = 10;
pub const SCRIPTED_OUTPUT_TOKENS: u64 = 5;
/// Latency reported per call, independent of the real delay.
pub const SCRIPTED_LATENCY: Duration = Duration::from_millis(7);

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    RateLimited,
    Timeout,
    Error(String),
    Panic,
}

/// One observed call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub prompt: String,
    pub project_dir: Option<PathBuf>,
    pub started: Instant,
    pub finished: Instant,
}

/// Replays replies in order, then repeats the fallback reply.
///
/// With a project root set, the executor behaves like a lifecycle executor:
/// the first turn gets a fresh directory under the root (a copy of the
/// request's template, when it has one) and later turns reuse the one they
/// are handed.
#[derive(Debug)]
pub struct ScriptedExecutor {
    info: ExecutorInfo,
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    delay: Duration,
    project_root: Option<PathBuf>,
    calls: Mutex<Vec<CallRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    projects_created: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(id: &str, provider: &str) -> Self {
        Self {
            info: ExecutorInfo {
                id: id.to_string(),
                provider: provider.to_string(),
                display_name: format!("Scripted {id}"),
                model_id: format!("{id}-model"),
                mode: ExecutionMode::Api,
                pricing: Pricing::new(1.0, 2.0),
            },
            replies: Mutex::new(VecDeque::new()),
            fallback: ScriptedReply::Text("ok".to_string()),
            delay: Duration::ZERO,
            project_root: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            projects_created: AtomicUsize::new(0),
        }
    }

    pub fn replies(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        *self.replies.lock().unwrap_or_else(PoisonError::into_inner) = replies.into_iter().collect();
        self
    }

    pub fn fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = reply;
        self
    }

    /// Holds each call open for `delay` so overlap becomes observable.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn project_mode(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self.info.mode = ExecutionMode::Project;
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock_calls().clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// Highest number of calls observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn projects_created(&self) -> usize {
        self.projects_created.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn project_dir_for(&self, request: &ExecutionRequest) -> std::io::Result<Option<PathBuf>> {
        let Some(root) = &self.project_root else {
            return Ok(None);
        };
        if let Some(existing) = &request.project_dir {
            return Ok(Some(existing.clone()));
        }
        let n = self.projects_created.fetch_add(1, Ordering::SeqCst);
        let dir = root.join(format!("{}-{n}", self.info.id));
        match &request.template_dir {
            Some(template) if template.is_dir() => crate::fixtures::copy_tree(template, &dir)?,
            _ => std::fs::create_dir_all(&dir)?,
        }
        std::fs::write(dir.join("marker.txt"), "project")?;
        Ok(Some(dir))
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<CallRecord>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn info(&self) -> &ExecutorInfo {
        &self.info
    }

    async fn execute(&self, request: &ExecutionRequest) -> devbench_proto::Result<ExecutionResult> {
        let started = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.next_reply();
        let project_dir = match reply {
            ScriptedReply::Text(_) => self.project_dir_for(request),
            _ => Ok(request.project_dir.clone()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let project_dir = project_dir?;
        self.lock_calls().push(CallRecord {
            prompt: request.prompt.clone(),
            project_dir: project_dir.clone(),
            started,
            finished: Instant::now(),
        });

        match reply {
            ScriptedReply::Text(content) => Ok(ExecutionResult {
                content,
                input_tokens: SCRIPTED_INPUT_TOKENS,
                output_tokens: SCRIPTED_OUTPUT_TOKENS,
                latency: SCRIPTED_LATENCY,
                tokens_source: TokensSource::Exact,
                mode: self.info.mode,
                model_id: self.info.model_id.clone(),
                project_dir,
            }),
            ScriptedReply::RateLimited => Err(ExecutionError::RateLimited {
                provider: self.info.provider.clone(),
                message: "429 Too Many Requests".to_string(),
            }),
            ScriptedReply::Timeout => Err(ExecutionError::Timeout {
                what: self.info.id.clone(),
                after: Duration::from_secs(1),
            }),
            ScriptedReply::Error(message) => Err(ExecutionError::Provider {
                provider: self.info.provider.clone(),
                message,
            }),
            ScriptedReply::Panic => panic!("scripted executor panic"),
        }
    }
}
