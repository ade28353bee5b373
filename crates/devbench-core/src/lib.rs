//! # devbench-core
//!
//! Execution and evaluation core of the devbench harness.
//!
//! This crate provides:
//! - The orchestrator: combination planning, per-provider concurrency, and
//!   retry turns with evaluation feedback
//! - The task contract, the immutable task catalog, and YAML task suites
//! - Evaluation strategies (test execution, rubric, hybrid, end-to-end) and
//!   the evaluator error boundary
//! - The subprocess runner, the multi-runtime code runner, and the
//!   end-to-end lifecycle runner
//! - Configuration, fixtures, rate-limit backoff, and result sinks

pub mod code_runner;
mod config;
pub mod e2e_runner;
pub mod evaluation;
mod evaluator;
mod fixtures;
mod orchestrator;
pub mod process;
mod retry;
pub mod sink;
mod task;
pub mod task_definition;
pub mod testing;

pub use code_runner::{
    CodeRunError, CodeRunResult, CodeRunner, ReportFormat, RuntimeProfile, TestSummary,
};
pub use config::{
    AgentBackend, AgentConfig, ApiProvider, BenchConfig, ConfigError, ConfigWarning, JudgeConfig,
    ModelConfig, RunSettings,
};
pub use e2e_runner::{
    E2eRunError, E2eRunResult, E2eRunner, LifecycleCommands, LifecycleTimeouts,
};
pub use evaluation::rubric::{RubricCriterion, RubricJudge, RubricVerdict};
pub use evaluation::{EvaluationContext, EvaluationStrategy};
pub use evaluator::Evaluator;
pub use fixtures::{FixtureStore, copy_tree};
pub use orchestrator::{
    Combination, CombinationKey, Orchestrator, OrchestratorError, RunOptions, retry_prompt,
};
pub use process::{CommandSpec, ProcessError, ProcessOutput};
pub use retry::RetryPolicy;
pub use sink::{
    ExecutorSummary, FanoutSink, JsonlSink, MemorySink, ProgressSink, ResultSink, RunSummary,
    SinkError,
};
pub use task::{CatalogError, Task, TaskCatalog, TaskInput, TaskResponse};
pub use task_definition::{DefinedTask, TaskDefinition, TaskDefinitionError, TaskSuite};
