//! Evaluation strategies.
//!
//! A task declares exactly one [`EvaluationStrategy`]; each variant has one
//! handler. Handlers return `Err` only for failures of the evaluation itself
//! (misconfiguration, judge errors, test runtimes that time out or cannot
//! start). A wrong answer is an `Ok` result with `passed = false`.

pub mod rubric;
pub mod scoring;

use crate::code_runner::{CodeRunResult, CodeRunner};
use crate::e2e_runner::E2eRunner;
use crate::fixtures::FixtureStore;
use crate::task::{TaskInput, TaskResponse};
use anyhow::{Context, bail};
use devbench_proto::{EvaluationResult, EvaluationType, Language};
use rubric::{JudgeRequest, RubricCriterion, RubricJudge, RubricVerdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Score for a failing test run when no other rule applies.
const DEFAULT_FAIL_SCORE: f64 = 2.0;
/// Score for a failing run that also omitted required sections.
const MISSING_SECTIONS_SCORE: f64 = 1.0;

/// A pre-existing test suite the response is run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteSpec {
    /// Suite directory relative to the fixtures root; `{language}` is
    /// substituted. Defaults to `<language>/<task_id>/tests`.
    #[serde(default)]
    pub tests_dir: Option<String>,

    /// File each language's suite imports, relative to the suite directory.
    pub impl_files: BTreeMap<Language, String>,

    /// Headings the response must contain (e.g. `PROBLEM:`).
    #[serde(default)]
    pub required_sections: Vec<String>,

    #[serde(default = "default_fail_score")]
    pub fail_score: f64,
}

fn default_fail_score() -> f64 {
    DEFAULT_FAIL_SCORE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricSpec {
    pub criteria: Vec<RubricCriterion>,
    /// Minimum raw rubric total for a pass.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

fn default_pass_threshold() -> f64 {
    3.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSpec {
    pub tests: TestSuiteSpec,
    pub rubric: RubricSpec,
}

/// A full-stack project exercised by a browser test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSpec {
    /// Template project, relative to the fixtures root.
    pub base_project: PathBuf,
    /// Playwright spec, relative to the project's `e2e/` directory.
    pub test_spec: String,
}

/// The closed set of evaluation strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EvaluationStrategy {
    TestExecution(TestSuiteSpec),
    Rubric(RubricSpec),
    Hybrid(HybridSpec),
    E2e(LifecycleSpec),
}

/// Shared collaborators the strategies need.
#[derive(Clone)]
pub struct EvaluationContext {
    pub fixtures: FixtureStore,
    pub code_runner: CodeRunner,
    pub e2e_runner: E2eRunner,
    pub judge: Arc<dyn RubricJudge>,
}

impl EvaluationContext {
    pub fn new(fixtures: FixtureStore, judge: Arc<dyn RubricJudge>) -> Self {
        Self {
            fixtures,
            code_runner: CodeRunner::default(),
            e2e_runner: E2eRunner::default(),
            judge,
        }
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("fixtures", &self.fixtures)
            .finish_non_exhaustive()
    }
}

/// Identity of the task being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct TaskMeta<'a> {
    pub id: &'a str,
    pub name: &'a str,
}

impl EvaluationStrategy {
    pub fn kind(&self) -> EvaluationType {
        match self {
            EvaluationStrategy::TestExecution(_) => EvaluationType::TestExecution,
            EvaluationStrategy::Rubric(_) => EvaluationType::Rubric,
            EvaluationStrategy::Hybrid(_) => EvaluationType::Hybrid,
            EvaluationStrategy::E2e(_) => EvaluationType::E2e,
        }
    }

    pub async fn evaluate(
        &self,
        ctx: &EvaluationContext,
        task: TaskMeta<'_>,
        response: &TaskResponse,
        input: &TaskInput,
    ) -> anyhow::Result<EvaluationResult> {
        debug!(task_id = task.id, strategy = %self.kind(), turn = response.turn, "Evaluating response");
        match self {
            EvaluationStrategy::TestExecution(spec) => {
                let run = run_suite(spec, ctx, task.id, response, input).await?;
                let sections_ok = has_sections(&response.content, &spec.required_sections);
                let passed = run.passed && sections_ok;
                let score = if passed {
                    5.0
                } else if !sections_ok {
                    MISSING_SECTIONS_SCORE
                } else {
                    spec.fail_score
                };
                let mut notes = run_notes(&run);
                if !sections_ok {
                    notes = format!("Missing required sections; {notes}");
                }
                Ok(EvaluationResult::new(passed, score, notes))
            }

            EvaluationStrategy::Rubric(spec) => {
                let verdict = judge(ctx, task, response, spec).await?;
                Ok(EvaluationResult::new(
                    verdict.total >= spec.pass_threshold,
                    verdict.normalized(),
                    verdict.summary,
                ))
            }

            EvaluationStrategy::Hybrid(spec) => {
                let run = run_suite(&spec.tests, ctx, task.id, response, input).await?;
                let verdict = judge(ctx, task, response, &spec.rubric).await?;
                let tests_component = if run.passed { 5.0 } else { 0.0 };
                let passed = run.passed && verdict.total >= spec.rubric.pass_threshold;
                let score = (tests_component + verdict.normalized()) / 2.0;
                let notes = format!("Tests: {}; Rubric: {}", run_notes(&run), verdict.summary);
                Ok(EvaluationResult::new(passed, score, notes))
            }

            EvaluationStrategy::E2e(spec) => {
                let Some(project_dir) = response.project_dir.as_deref() else {
                    bail!(
                        "e2e evaluation requires a project directory, but the executor returned text only"
                    );
                };
                let run = ctx.e2e_runner.run(project_dir, &spec.test_spec).await?;
                let score = scoring::score_for_turn(response.turn, run.total_tests, run.passed_tests);
                let notes = run
                    .error_message
                    .clone()
                    .filter(|e| !e.is_empty())
                    .or_else(|| Some(run.output.clone()).filter(|o| !o.is_empty()))
                    .unwrap_or_else(|| {
                        format!("{}/{} tests passed", run.passed_tests, run.total_tests)
                    });
                Ok(EvaluationResult::new(run.passed, f64::from(score), notes))
            }
        }
    }
}

async fn run_suite(
    spec: &TestSuiteSpec,
    ctx: &EvaluationContext,
    task_id: &str,
    response: &TaskResponse,
    input: &TaskInput,
) -> anyhow::Result<CodeRunResult> {
    let language = input.language;
    let impl_file = spec
        .impl_files
        .get(&language)
        .with_context(|| format!("no implementation file configured for {language}"))?;
    let tests_dir = match &spec.tests_dir {
        Some(dir) => ctx
            .fixtures
            .resolve(Path::new(&dir.replace("{language}", language.as_str()))),
        None => ctx.fixtures.tests_dir(language, task_id),
    };
    if !tests_dir.is_dir() {
        bail!("test suite directory {} does not exist", tests_dir.display());
    }
    let run = ctx
        .code_runner
        .run_tests(&response.content, language, &tests_dir, impl_file)
        .await?;
    Ok(run)
}

async fn judge(
    ctx: &EvaluationContext,
    task: TaskMeta<'_>,
    response: &TaskResponse,
    spec: &RubricSpec,
) -> anyhow::Result<RubricVerdict> {
    ctx.judge
        .judge(&JudgeRequest {
            task_id: task.id,
            task_name: task.name,
            response: &response.content,
            criteria: &spec.criteria,
        })
        .await
        .context("rubric judge failed")
}

fn has_sections(content: &str, sections: &[String]) -> bool {
    let haystack = content.to_lowercase();
    sections
        .iter()
        .all(|s| haystack.contains(&s.to_lowercase()))
}

fn run_notes(run: &CodeRunResult) -> String {
    if !run.output.is_empty() {
        run.output.clone()
    } else {
        run.error_message.clone().unwrap_or_default()
    }
}
