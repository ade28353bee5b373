//! Task whose verdicts follow a fixed rule instead of running anything.

use crate::task::{Task, TaskInput, TaskResponse};
use async_trait::async_trait;
use devbench_proto::{EvaluationResult, EvaluationType, Language};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// When a [`ScriptedTask`] reports a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassRule {
    Never,
    Always,
    /// Passes on this 1-based turn and every later one.
    OnTurn(u32),
    ContentContains(String),
}

impl PassRule {
    fn passes(&self, response: &TaskResponse) -> bool {
        match self {
            PassRule::Never => false,
            PassRule::Always => true,
            PassRule::OnTurn(turn) => response.turn >= *turn,
            PassRule::ContentContains(needle) => response.content.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Rule(PassRule),
    Fail(String),
    Panic,
}

/// A task with a fixed prompt and a scripted evaluation.
///
/// Passing responses score 5, failing ones 1.
#[derive(Debug)]
pub struct ScriptedTask {
    id: String,
    name: String,
    languages: Vec<Language>,
    evaluation_type: EvaluationType,
    max_turns: u32,
    base_project: Option<PathBuf>,
    outcome: Outcome,
    evaluations: AtomicUsize,
    seen: Mutex<Vec<TaskResponse>>,
}

impl ScriptedTask {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Task {id}"),
            languages: vec![Language::Nodejs],
            evaluation_type: EvaluationType::TestExecution,
            max_turns: 1,
            base_project: None,
            outcome: Outcome::Rule(PassRule::Never),
            evaluations: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn pass_when(mut self, rule: PassRule) -> Self {
        self.outcome = Outcome::Rule(rule);
        self
    }

    /// Every evaluation returns an error with this message.
    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.outcome = Outcome::Fail(message.into());
        self
    }

    pub fn panic_on_evaluate(mut self) -> Self {
        self.outcome = Outcome::Panic;
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn languages(mut self, languages: impl IntoIterator<Item = Language>) -> Self {
        self.languages = languages.into_iter().collect();
        self
    }

    pub fn evaluation_type(mut self, evaluation_type: EvaluationType) -> Self {
        self.evaluation_type = evaluation_type;
        self
    }

    pub fn base_project(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_project = Some(path.into());
        self
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Responses evaluated so far, in call order.
    pub fn seen(&self) -> Vec<TaskResponse> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Task for ScriptedTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_languages(&self) -> &[Language] {
        &self.languages
    }

    fn evaluation_type(&self) -> EvaluationType {
        self.evaluation_type
    }

    fn max_turns(&self) -> u32 {
        self.max_turns
    }

    fn base_project(&self) -> Option<&Path> {
        self.base_project.as_deref()
    }

    fn build_prompt(&self, input: &TaskInput) -> String {
        format!("Solve {} in {}", self.id, input.language)
    }

    async fn evaluate(
        &self,
        response: &TaskResponse,
        _input: &TaskInput,
    ) -> anyhow::Result<EvaluationResult> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response.clone());

        match &self.outcome {
            Outcome::Rule(rule) => {
                if rule.passes(response) {
                    Ok(EvaluationResult::new(true, 5.0, "scripted pass"))
                } else {
                    Ok(EvaluationResult::new(false, 1.0, "scripted failure"))
                }
            }
            Outcome::Fail(message) => anyhow::bail!("{message}"),
            Outcome::Panic => panic!("scripted task panic"),
        }
    }
}
