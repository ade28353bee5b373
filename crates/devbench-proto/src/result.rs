//! The terminal record for one combination.

use crate::execution::{ExecutionMode, TokensSource};
use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flattened result of one (task, executor, language, run) combination.
///
/// Created once, never mutated afterwards, and handed to result sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    // Identification
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub task_name: String,
    pub language: Language,
    pub run_number: u32,

    // Executor
    pub mode: ExecutionMode,
    pub provider: String,
    pub executor_id: String,
    pub model_id: String,
    pub display_name: String,

    // Cumulative metrics across all turns used
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub tokens_source: TokensSource,
    pub latency_ms: u64,

    // Retry loop
    pub turns: u32,
    /// Turn on which the combination first passed; 0 if it never did.
    pub passed_on_turn: u32,
    pub score_history: Vec<f64>,

    // Final verdict
    pub passed: bool,
    pub score: f64,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    // Audit trail
    pub raw_prompt: String,
    pub raw_response: String,
}

/// Coarse outcome used for progress lines and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Pass,
    Fail,
    /// Infrastructure or evaluation error; excluded from quality statistics.
    Error,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pass => "PASS",
            ResultStatus::Fail => "FAIL",
            ResultStatus::Error => "ERROR",
        }
    }
}

impl BenchmarkResult {
    pub fn status(&self) -> ResultStatus {
        if self.error_message.is_some() {
            ResultStatus::Error
        } else if self.passed {
            ResultStatus::Pass
        } else {
            ResultStatus::Fail
        }
    }

    /// True when no response was ever obtained (zeroed metrics plus an error).
    pub fn is_infrastructure_failure(&self) -> bool {
        self.turns == 0 && self.error_message.is_some()
    }
}
