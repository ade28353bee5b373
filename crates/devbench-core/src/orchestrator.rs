//! Combination planning, per-provider concurrency, and the retry-turn loop.
//!
//! Every planned combination yields exactly one [`BenchmarkResult`]. Failures
//! are recovered at the combination boundary: an executor error or a panic
//! produces an error result with zeroed metrics, and evaluation failures are
//! already turned into failed verdicts by the [`Evaluator`].

use crate::config::RunSettings;
use crate::evaluator::{Evaluator, panic_message};
use crate::fixtures::FixtureStore;
use crate::retry::RetryPolicy;
use crate::sink::ResultSink;
use crate::task::{Task, TaskResponse};
use devbench_proto::{
    BenchmarkResult, EvaluationResult, ExecutionRequest, Executor, Language, TokensSource,
};
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Knobs for one orchestrated run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub runs_per_combo: u32,
    /// In-flight combinations allowed per provider.
    pub max_concurrent: usize,
    /// Languages to plan; each task contributes the intersection with its own.
    pub languages: Vec<Language>,
    /// Global cap on turns, applied on top of each task's limit.
    pub max_turns: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            runs_per_combo: 1,
            max_concurrent: 3,
            languages: Language::ALL.to_vec(),
            max_turns: None,
            max_output_tokens: None,
            temperature: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&RunSettings> for RunOptions {
    fn from(settings: &RunSettings) -> Self {
        Self {
            runs_per_combo: settings.runs_per_combo,
            max_concurrent: settings.max_concurrent,
            languages: settings.languages.clone(),
            max_turns: settings.max_turns,
            max_output_tokens: Some(settings.max_output_tokens),
            temperature: Some(settings.temperature),
            retry: RetryPolicy::new(
                settings.rate_limit_attempts,
                Duration::from_millis(settings.rate_limit_base_delay_ms),
            ),
        }
    }
}

/// Errors that abort a run before any combination executes.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no executors configured")]
    NoExecutors,

    #[error("invalid run option: {0}")]
    InvalidOptions(String),

    #[error("nothing to run: no task supports the selected languages")]
    EmptyPlan,
}

/// One unit of work: (task, executor, language, run).
#[derive(Clone)]
pub struct Combination {
    pub task: Arc<dyn Task>,
    pub executor: Arc<dyn Executor>,
    pub language: Language,
    /// 1-based.
    pub run_number: u32,
}

impl Combination {
    pub fn key(&self) -> CombinationKey {
        CombinationKey {
            task_id: self.task.id().to_string(),
            executor_id: self.executor.info().id.clone(),
            language: self.language,
            run_number: self.run_number,
        }
    }
}

impl std::fmt::Debug for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.key(), f)
    }
}

/// Identity of a combination, comparable across plans and results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombinationKey {
    pub task_id: String,
    pub executor_id: String,
    pub language: Language,
    pub run_number: u32,
}

impl CombinationKey {
    pub fn of(result: &BenchmarkResult) -> Self {
        Self {
            task_id: result.task_id.clone(),
            executor_id: result.executor_id.clone(),
            language: result.language,
            run_number: result.run_number,
        }
    }
}

/// Drives combinations through executors and the evaluator.
pub struct Orchestrator {
    executors: Vec<Arc<dyn Executor>>,
    fixtures: FixtureStore,
    options: RunOptions,
    evaluator: Evaluator,
    limiters: HashMap<String, Arc<Semaphore>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field(
                "executors",
                &self.executors.iter().map(|e| &e.info().id).collect::<Vec<_>>(),
            )
            .field("fixtures", &self.fixtures)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        executors: Vec<Arc<dyn Executor>>,
        fixtures: FixtureStore,
        options: RunOptions,
    ) -> Result<Self, OrchestratorError> {
        if executors.is_empty() {
            return Err(OrchestratorError::NoExecutors);
        }
        if options.runs_per_combo == 0 {
            return Err(OrchestratorError::InvalidOptions(
                "runs_per_combo must be at least 1".to_string(),
            ));
        }
        if options.max_concurrent == 0 {
            return Err(OrchestratorError::InvalidOptions(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        let mut limiters = HashMap::new();
        for executor in &executors {
            limiters
                .entry(executor.info().provider.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(options.max_concurrent)));
        }

        Ok(Self {
            executors,
            fixtures,
            options,
            evaluator: Evaluator,
            limiters,
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Expands the matrix in a fixed order: task, executor, language, run.
    pub fn plan(&self, tasks: &[Arc<dyn Task>]) -> Vec<Combination> {
        let mut plan = Vec::new();
        for task in tasks {
            let languages: Vec<Language> = task
                .supported_languages()
                .iter()
                .copied()
                .filter(|l| self.options.languages.contains(l))
                .collect();
            for executor in &self.executors {
                for &language in &languages {
                    for run_number in 1..=self.options.runs_per_combo {
                        plan.push(Combination {
                            task: Arc::clone(task),
                            executor: Arc::clone(executor),
                            language,
                            run_number,
                        });
                    }
                }
            }
        }
        plan
    }

    /// Runs every planned combination and streams each result to `sink` as
    /// it finishes. Results are returned in completion order.
    pub async fn run(
        &self,
        tasks: &[Arc<dyn Task>],
        sink: &dyn ResultSink,
    ) -> Result<Vec<BenchmarkResult>, OrchestratorError> {
        let plan = self.plan(tasks);
        if plan.is_empty() {
            return Err(OrchestratorError::EmptyPlan);
        }

        let total = plan.len();
        sink.set_total(total);
        info!(
            combinations = total,
            providers = self.limiters.len(),
            max_concurrent = self.options.max_concurrent,
            "Starting benchmark run"
        );

        let mut pending: FuturesUnordered<_> = plan
            .into_iter()
            .map(|combo| self.run_combination(combo))
            .collect();

        let mut results = Vec::with_capacity(total);
        while let Some(result) = pending.next().await {
            if let Err(e) = sink.record(&result) {
                warn!(task_id = %result.task_id, executor = %result.executor_id, error = %e, "Result sink failed");
            }
            results.push(result);
        }

        info!(
            results = results.len(),
            passed = results.iter().filter(|r| r.passed).count(),
            "Benchmark run finished"
        );
        Ok(results)
    }

    /// Runs one combination to completion. Never fails.
    pub async fn run_combination(&self, combo: Combination) -> BenchmarkResult {
        let provider = combo.executor.info().provider.clone();
        let limiter = self
            .limiters
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(self.options.max_concurrent)));

        let _permit = match limiter.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                return error_result(&combo, &TurnState::default(), format!("{e}"));
            }
        };

        debug!(combo = ?combo, "Combination started");
        let mut state = TurnState::default();
        let outcome = AssertUnwindSafe(self.drive_turns(&combo, &mut state))
            .catch_unwind()
            .await;

        if let Some(dir) = state.project_dir.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %e, "Failed to remove project directory");
            }
        }

        let result = match outcome {
            Ok(Ok(())) => finished_result(&combo, &state),
            Ok(Err(e)) => {
                warn!(combo = ?combo, error = %e, "Combination failed");
                error_result(&combo, &state, e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(combo = ?combo, panic = %message, "Combination panicked");
                error_result(&combo, &state, format!("panicked: {message}"))
            }
        };

        info!(
            task_id = combo.task.id(),
            executor = %combo.executor.info().id,
            language = %combo.language,
            run = combo.run_number,
            status = result.status().as_str(),
            turns = result.turns,
            "Combination finished"
        );
        result
    }

    fn turn_limit(&self, task: &dyn Task) -> u32 {
        let limit = task.max_turns().max(1);
        self.options
            .max_turns
            .map_or(limit, |cap| limit.min(cap.max(1)))
    }

    async fn drive_turns(
        &self,
        combo: &Combination,
        state: &mut TurnState,
    ) -> Result<(), CombinationError> {
        let task = combo.task.as_ref();
        let executor = combo.executor.as_ref();
        let info = executor.info();

        let input = self
            .fixtures
            .load(task.id(), combo.language)
            .await
            .map_err(CombinationError::Fixture)?;
        state.original_prompt = task.build_prompt(&input);

        let max_turns = self.turn_limit(task);
        for turn in 1..=max_turns {
            let prompt = match &state.last_evaluation {
                Some(evaluation) if turn > 1 => retry_prompt(
                    &state.original_prompt,
                    turn - 1,
                    &state.last_response,
                    evaluation,
                ),
                _ => state.original_prompt.clone(),
            };

            let mut request = ExecutionRequest::new(prompt)
                .with_system_prompt(task.system_prompt().map(str::to_string))
                .with_limits(self.options.max_output_tokens, self.options.temperature);
            request.template_dir = task.base_project().map(PathBuf::from);
            request.project_dir = state.project_dir.clone();

            let executed = self
                .options
                .retry
                .run(&info.id, || executor.execute(&request))
                .await
                .map_err(CombinationError::Execution)?;

            if executed.project_dir.is_some() {
                state.project_dir = executed.project_dir.clone();
            }
            state.input_tokens += executed.input_tokens;
            state.output_tokens += executed.output_tokens;
            state.latency += executed.latency;
            state.tokens_source = Some(
                state
                    .tokens_source
                    .map_or(executed.tokens_source, |s| s.merge(executed.tokens_source)),
            );
            state.model_id = Some(executed.model_id);
            state.last_response = executed.content;
            state.turns = turn;

            let response = TaskResponse {
                content: state.last_response.clone(),
                project_dir: state.project_dir.clone(),
                turn,
            };
            let evaluation = self.evaluator.evaluate(task, &response, &input).await;
            state.score_history.push(evaluation.score);

            let passed = evaluation.passed;
            debug!(
                task_id = task.id(),
                executor = %info.id,
                turn,
                passed,
                score = evaluation.score,
                "Turn evaluated"
            );
            state.last_evaluation = Some(evaluation);
            if passed {
                state.passed_on_turn = turn;
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum CombinationError {
    #[error("failed to load fixture: {0}")]
    Fixture(std::io::Error),

    #[error("{0}")]
    Execution(devbench_proto::ExecutionError),
}

/// Accumulated state of one combination's turns.
#[derive(Debug, Default)]
struct TurnState {
    original_prompt: String,
    last_response: String,
    project_dir: Option<PathBuf>,
    input_tokens: u64,
    output_tokens: u64,
    latency: Duration,
    tokens_source: Option<TokensSource>,
    model_id: Option<String>,
    turns: u32,
    passed_on_turn: u32,
    score_history: Vec<f64>,
    last_evaluation: Option<EvaluationResult>,
}

/// Prompt for the turn after `previous_turn`: the original request followed by
/// the failed answer and its evaluation.
pub fn retry_prompt(
    original: &str,
    previous_turn: u32,
    previous_response: &str,
    evaluation: &EvaluationResult,
) -> String {
    let mut prompt = format!(
        "{original}\n\n---\nPREVIOUS ATTEMPT (turn {previous_turn}):\n{previous_response}\n\n\
         EVALUATION FEEDBACK:\nScore: {}/5\n",
        evaluation.score
    );
    if !evaluation.notes.is_empty() {
        prompt.push_str(&format!("Notes: {}\n", evaluation.notes));
    }
    if let Some(error) = &evaluation.error_message {
        prompt.push_str(&format!("Error: {error}\n"));
    }
    prompt.push_str(
        "\nThe previous attempt did not pass. Fix the issues above and provide a complete corrected answer.",
    );
    prompt
}

fn finished_result(combo: &Combination, state: &TurnState) -> BenchmarkResult {
    let info = combo.executor.info();
    let evaluation = state.last_evaluation.clone().unwrap_or_default();
    BenchmarkResult {
        timestamp: chrono::Utc::now(),
        task_id: combo.task.id().to_string(),
        task_name: combo.task.name().to_string(),
        language: combo.language,
        run_number: combo.run_number,
        mode: info.mode,
        provider: info.provider.clone(),
        executor_id: info.id.clone(),
        model_id: state.model_id.clone().unwrap_or_else(|| info.model_id.clone()),
        display_name: info.display_name.clone(),
        input_tokens: state.input_tokens,
        output_tokens: state.output_tokens,
        total_tokens: state.input_tokens + state.output_tokens,
        cost_usd: info.pricing.cost(state.input_tokens, state.output_tokens),
        tokens_source: state.tokens_source.unwrap_or_default(),
        latency_ms: state.latency.as_millis() as u64,
        turns: state.turns,
        passed_on_turn: state.passed_on_turn,
        score_history: state.score_history.clone(),
        passed: evaluation.passed,
        score: evaluation.score,
        notes: evaluation.notes,
        error_message: evaluation.error_message,
        raw_prompt: state.original_prompt.clone(),
        raw_response: state.last_response.clone(),
    }
}

/// Zeroed metrics; the prompt and last response are kept for diagnosis.
fn error_result(combo: &Combination, state: &TurnState, message: String) -> BenchmarkResult {
    let info = combo.executor.info();
    BenchmarkResult {
        timestamp: chrono::Utc::now(),
        task_id: combo.task.id().to_string(),
        task_name: combo.task.name().to_string(),
        language: combo.language,
        run_number: combo.run_number,
        mode: info.mode,
        provider: info.provider.clone(),
        executor_id: info.id.clone(),
        model_id: info.model_id.clone(),
        display_name: info.display_name.clone(),
        input_tokens: 0,
        output_tokens: 0,
        total_tokens: 0,
        cost_usd: 0.0,
        tokens_source: TokensSource::Estimated,
        latency_ms: 0,
        turns: 0,
        passed_on_turn: 0,
        score_history: Vec::new(),
        passed: false,
        score: 0.0,
        notes: String::new(),
        error_message: Some(message),
        raw_prompt: state.original_prompt.clone(),
        raw_response: state.last_response.clone(),
    }
}
