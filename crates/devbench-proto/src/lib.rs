//! # devbench-proto
//!
//! Shared types, error definitions, and traits for the devbench harness.
//!
//! This crate provides the foundational abstractions used across all devbench
//! crates, including:
//! - The `Executor` contract and its request/result records
//! - Evaluation and benchmark result records handed to reporters
//! - Target languages and pricing
//! - The structured executor error taxonomy

mod error;
mod evaluation;
mod execution;
mod language;
mod pricing;
mod result;

pub use error::{ExecutionError, Result};
pub use evaluation::{EvaluationResult, EvaluationType};
pub use execution::{
    ExecutionMode, ExecutionRequest, ExecutionResult, Executor, ExecutorInfo, TokensSource,
};
pub use language::{Language, UnknownLanguage};
pub use pricing::{Pricing, estimate_tokens};
pub use result::{BenchmarkResult, ResultStatus};
