//! Deterministic doubles for exercising orchestration without models,
//! agents, or test runtimes.

mod scripted_executor;
mod scripted_task;

pub use scripted_executor::{
    CallRecord, SCRIPTED_INPUT_TOKENS, SCRIPTED_LATENCY, SCRIPTED_OUTPUT_TOKENS, ScriptedExecutor,
    ScriptedReply,
};
pub use scripted_task::{PassRule, ScriptedTask};

use crate::evaluation::rubric::{JudgeRequest, RubricJudge, RubricVerdict, max_total};
use async_trait::async_trait;
use devbench_proto::{BenchmarkResult, ExecutionMode, Language, TokensSource};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Judge that always awards the same total.
#[derive(Debug)]
pub struct FixedJudge {
    total: f64,
    summary: String,
}

impl FixedJudge {
    pub fn new(total: f64, summary: impl Into<String>) -> Self {
        Self {
            total,
            summary: summary.into(),
        }
    }
}

#[async_trait]
impl RubricJudge for FixedJudge {
    async fn judge(&self, request: &JudgeRequest<'_>) -> anyhow::Result<RubricVerdict> {
        let max_total = max_total(request.criteria);
        Ok(RubricVerdict {
            scores: Vec::new(),
            total: self.total.min(f64::from(max_total)),
            max_total,
            summary: self.summary.clone(),
        })
    }
}

/// Judge that fails every call.
#[derive(Debug)]
pub struct FailingJudge {
    message: String,
    calls: AtomicUsize,
}

impl FailingJudge {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RubricJudge for FailingJudge {
    async fn judge(&self, _request: &JudgeRequest<'_>) -> anyhow::Result<RubricVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("{}", self.message)
    }
}

/// A plausible finished result for sink and summary tests.
pub fn sample_result(task_id: &str, executor_id: &str, passed: bool) -> BenchmarkResult {
    BenchmarkResult {
        timestamp: chrono::Utc::now(),
        task_id: task_id.to_string(),
        task_name: format!("Task {task_id}"),
        language: Language::Nodejs,
        run_number: 1,
        mode: ExecutionMode::Api,
        provider: "scripted".to_string(),
        executor_id: executor_id.to_string(),
        model_id: format!("{executor_id}-model"),
        display_name: format!("Executor {executor_id}"),
        input_tokens: 100,
        output_tokens: 50,
        total_tokens: 150,
        cost_usd: 0.001,
        tokens_source: TokensSource::Exact,
        latency_ms: 1200,
        turns: 1,
        passed_on_turn: u32::from(passed),
        score_history: vec![if passed { 5.0 } else { 2.0 }],
        passed,
        score: if passed { 5.0 } else { 2.0 },
        notes: String::new(),
        error_message: None,
        raw_prompt: "prompt".to_string(),
        raw_response: "response".to_string(),
    }
}
