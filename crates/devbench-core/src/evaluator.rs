//! Error boundary around [`Task::evaluate`].

use crate::task::{Task, TaskInput, TaskResponse};
use devbench_proto::EvaluationResult;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::warn;

/// Calls a task's evaluation and converts every failure, panics included,
/// into a zero-score failed [`EvaluationResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub async fn evaluate(
        &self,
        task: &dyn Task,
        response: &TaskResponse,
        input: &TaskInput,
    ) -> EvaluationResult {
        match AssertUnwindSafe(task.evaluate(response, input))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(task_id = task.id(), error = %e, "Evaluation failed");
                EvaluationResult::error(format!("Evaluation error: {e:#}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(task_id = task.id(), panic = %message, "Evaluation panicked");
                EvaluationResult::error(format!("Evaluation error: panicked: {message}"))
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PassRule, ScriptedTask};
    use devbench_proto::Language;

    #[tokio::test]
    async fn test_passes_through_results() {
        let task = ScriptedTask::new("j01").pass_when(PassRule::Always);
        let result = Evaluator
            .evaluate(
                &task,
                &TaskResponse::text("x", 1),
                &TaskInput::new(Language::Nodejs),
            )
            .await;
        assert!(result.passed);
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_error_becomes_failed_result() {
        let task = ScriptedTask::new("j01").fail_with("runtime missing");
        let result = Evaluator
            .evaluate(
                &task,
                &TaskResponse::text("x", 1),
                &TaskInput::new(Language::Nodejs),
            )
            .await;
        assert!(!result.passed);
        assert!(result.score.abs() < f64::EPSILON);
        assert!(result.notes.is_empty());
        assert_eq!(
            result.error_message.as_deref(),
            Some("Evaluation error: runtime missing")
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let task = ScriptedTask::new("j01").panic_on_evaluate();
        let result = Evaluator
            .evaluate(
                &task,
                &TaskResponse::text("x", 1),
                &TaskInput::new(Language::Nodejs),
            )
            .await;
        assert!(!result.passed);
        assert!(result.error_message.unwrap().contains("panicked"));
    }
}
