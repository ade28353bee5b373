//! Evaluation strategy tags and per-attempt verdicts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a task's responses are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationType {
    /// Run the response against a pre-existing test suite.
    TestExecution,
    /// Score free-form output against weighted criteria with an LLM judge.
    Rubric,
    /// Both of the above.
    Hybrid,
    /// Build and browser-test a generated web project.
    E2e,
}

impl EvaluationType {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationType::TestExecution => "test-execution",
            EvaluationType::Rubric => "rubric",
            EvaluationType::Hybrid => "hybrid",
            EvaluationType::E2e => "e2e",
        }
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub passed: bool,
    /// Quality score on a 0–5 scale.
    pub score: f64,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EvaluationResult {
    pub fn new(passed: bool, score: f64, notes: impl Into<String>) -> Self {
        Self {
            passed,
            score: score.clamp(0.0, 5.0),
            notes: notes.into(),
            error_message: None,
        }
    }

    /// A zero-score failure carrying an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: 0.0,
            notes: String::new(),
            error_message: Some(message.into()),
        }
    }
}
