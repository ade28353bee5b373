//! The task contract and the immutable catalog of registered tasks.

use async_trait::async_trait;
use devbench_proto::{EvaluationResult, EvaluationType, Language};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-execution input handed to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub language: Language,
    /// Starter source; empty when the task has no fixture.
    pub fixture_code: String,
    /// Extra material such as a CI log.
    pub additional_context: Option<String>,
}

impl TaskInput {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            fixture_code: String::new(),
            additional_context: None,
        }
    }
}

/// What a task evaluates: the response of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResponse {
    pub content: String,
    /// Project tree produced by a lifecycle executor.
    pub project_dir: Option<PathBuf>,
    /// 1-based turn number within the combination.
    pub turn: u32,
}

impl TaskResponse {
    pub fn text(content: impl Into<String>, turn: u32) -> Self {
        Self {
            content: content.into(),
            project_dir: None,
            turn,
        }
    }
}

/// A benchmark task.
///
/// Tasks are registered once into a [`TaskCatalog`] and never mutated.
/// `build_prompt` must return the same prompt regardless of executor kind.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn supported_languages(&self) -> &[Language];

    fn evaluation_type(&self) -> EvaluationType;

    /// Upper bound on retry turns for one combination (at least 1).
    fn max_turns(&self) -> u32;

    fn system_prompt(&self) -> Option<&str> {
        None
    }

    /// Template project copied before the first turn of a lifecycle task.
    fn base_project(&self) -> Option<&Path> {
        None
    }

    fn build_prompt(&self, input: &TaskInput) -> String;

    /// Scores one response. Errors are converted into failed evaluations by
    /// [`crate::Evaluator`].
    async fn evaluate(
        &self,
        response: &TaskResponse,
        input: &TaskInput,
    ) -> anyhow::Result<EvaluationResult>;
}

/// Errors building a catalog or resolving tasks from it.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("task id '{0}' is registered more than once")]
    DuplicateTask(String),

    #[error("unknown task id(s): {}", .0.join(", "))]
    UnknownTasks(Vec<String>),

    #[error("no tasks selected")]
    Empty,
}

/// Immutable set of tasks, built once at startup and passed by reference.
#[derive(Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<Arc<dyn Task>>,
}

impl std::fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tasks.iter().map(|t| t.id()))
            .finish()
    }
}

impl TaskCatalog {
    /// Builds a catalog, rejecting duplicate ids. Registration order is kept.
    pub fn new(tasks: Vec<Arc<dyn Task>>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id().to_string()) {
                return Err(CatalogError::DuplicateTask(task.id().to_string()));
            }
        }
        Ok(Self { tasks })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Task>> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Task>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Resolves `all` or a comma-separated id list, in catalog order.
    pub fn resolve(&self, selector: &str) -> Result<Vec<Arc<dyn Task>>, CatalogError> {
        let selector = selector.trim();
        if selector.is_empty() || selector.eq_ignore_ascii_case("all") {
            if self.tasks.is_empty() {
                return Err(CatalogError::Empty);
            }
            return Ok(self.tasks.clone());
        }

        let wanted: Vec<&str> = selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let unknown: Vec<String> = wanted
            .iter()
            .filter(|id| self.get(id).is_none())
            .map(|id| (*id).to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(CatalogError::UnknownTasks(unknown));
        }

        let selected: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| wanted.contains(&t.id()))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTask;

    fn catalog() -> TaskCatalog {
        TaskCatalog::new(vec![
            Arc::new(ScriptedTask::new("j01")),
            Arc::new(ScriptedTask::new("j02")),
            Arc::new(ScriptedTask::new("j03")),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_all() {
        let tasks = catalog().resolve("all").unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["j01", "j02", "j03"]);
    }

    #[test]
    fn test_resolve_list_keeps_catalog_order() {
        let tasks = catalog().resolve("j03, j01").unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["j01", "j03"]);
    }

    #[test]
    fn test_resolve_unknown() {
        let err = catalog().resolve("j01,j99").err().expect("expected error");
        assert!(matches!(err, CatalogError::UnknownTasks(ids) if ids == vec!["j99"]));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = TaskCatalog::new(vec![
            Arc::new(ScriptedTask::new("j01")),
            Arc::new(ScriptedTask::new("j01")),
        ]);
        assert!(matches!(result, Err(CatalogError::DuplicateTask(id)) if id == "j01"));
    }

    #[test]
    fn test_empty_catalog() {
        assert!(matches!(
            TaskCatalog::default().resolve("all"),
            Err(CatalogError::Empty)
        ));
    }
}
