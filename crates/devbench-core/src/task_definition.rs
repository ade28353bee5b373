//! Data-driven task definitions.
//!
//! A task suite is a YAML file listing tasks, each with a prompt template
//! and one evaluation strategy:
//!
//! ```yaml
//! tasks:
//!   - id: j01
//!     name: Code Generation - REST API
//!     languages: [nodejs, java, dotnet]
//!     system_prompt: You are a senior backend developer. Respond with code only.
//!     prompt: |
//!       Generate a POST /users endpoint.
//!       LANGUAGE: {language}
//!       FRAMEWORK: {framework}
//!       EXISTING BASE CODE:
//!       {fixture}
//!     evaluation:
//!       type: test-execution
//!       impl_files: { nodejs: users.js, java: src/main/java/Users.java, dotnet: Users.cs }
//! ```
//!
//! Placeholders: `{language}`, `{framework}`, `{fixture}`, `{context}`.

use crate::evaluation::{EvaluationContext, EvaluationStrategy, TaskMeta};
use crate::task::{CatalogError, Task, TaskCatalog, TaskInput, TaskResponse};
use async_trait::async_trait;
use devbench_proto::{EvaluationResult, EvaluationType, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A suite of task definitions loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSuite {
    pub tasks: Vec<TaskDefinition>,
}

impl TaskSuite {
    /// Loads and validates a suite from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TaskDefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let suite = Self::parse_yaml(&content)?;
        debug!(path = %path.display(), tasks = suite.tasks.len(), "Task suite loaded");
        Ok(suite)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, TaskDefinitionError> {
        let suite: Self = serde_yaml::from_str(content)?;
        suite.validate()?;
        Ok(suite)
    }

    pub fn validate(&self) -> Result<(), TaskDefinitionError> {
        if self.tasks.is_empty() {
            return Err(TaskDefinitionError::Validation(
                "Task suite must contain at least one task".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !seen.insert(task.id.as_str()) {
                return Err(TaskDefinitionError::Validation(format!(
                    "Duplicate task id '{}'",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// Binds every definition to the evaluation collaborators.
    pub fn into_catalog(self, ctx: Arc<EvaluationContext>) -> Result<TaskCatalog, CatalogError> {
        let tasks = self
            .tasks
            .into_iter()
            .map(|def| Arc::new(DefinedTask::new(def, Arc::clone(&ctx))) as Arc<dyn Task>)
            .collect();
        TaskCatalog::new(tasks)
    }
}

/// One task as written in the suite file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub languages: Vec<Language>,

    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Prompt template.
    pub prompt: String,

    pub evaluation: EvaluationStrategy,
}

fn default_max_turns() -> u32 {
    1
}

impl TaskDefinition {
    pub fn validate(&self) -> Result<(), TaskDefinitionError> {
        if self.id.trim().is_empty() {
            return Err(TaskDefinitionError::MissingField("id".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(TaskDefinitionError::MissingField("name".to_string()));
        }
        if self.prompt.trim().is_empty() {
            return Err(TaskDefinitionError::MissingField("prompt".to_string()));
        }
        if self.languages.is_empty() {
            return Err(TaskDefinitionError::Validation(format!(
                "Task '{}' must support at least one language",
                self.id
            )));
        }
        if self.max_turns == 0 {
            return Err(TaskDefinitionError::Validation(format!(
                "Task '{}': max_turns must be at least 1",
                self.id
            )));
        }

        match &self.evaluation {
            EvaluationStrategy::TestExecution(tests) => self.check_impl_files(tests)?,
            EvaluationStrategy::Hybrid(hybrid) => {
                self.check_impl_files(&hybrid.tests)?;
                self.check_criteria(&hybrid.rubric)?;
            }
            EvaluationStrategy::Rubric(rubric) => self.check_criteria(rubric)?,
            EvaluationStrategy::E2e(lifecycle) => {
                if lifecycle.test_spec.trim().is_empty() {
                    return Err(TaskDefinitionError::MissingField(format!(
                        "{}.evaluation.test_spec",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_impl_files(
        &self,
        tests: &crate::evaluation::TestSuiteSpec,
    ) -> Result<(), TaskDefinitionError> {
        if let Some(lang) = self
            .languages
            .iter()
            .find(|l| !tests.impl_files.contains_key(l))
        {
            return Err(TaskDefinitionError::Validation(format!(
                "Task '{}' supports {lang} but has no impl_files entry for it",
                self.id
            )));
        }
        Ok(())
    }

    fn check_criteria(
        &self,
        rubric: &crate::evaluation::RubricSpec,
    ) -> Result<(), TaskDefinitionError> {
        if rubric.criteria.is_empty() {
            return Err(TaskDefinitionError::Validation(format!(
                "Task '{}' has an empty rubric",
                self.id
            )));
        }
        Ok(())
    }

    /// Renders the prompt template for one input.
    pub fn render_prompt(&self, input: &TaskInput) -> String {
        self.prompt
            .replace("{language}", input.language.as_str())
            .replace("{framework}", input.language.framework())
            .replace("{fixture}", &input.fixture_code)
            .replace(
                "{context}",
                input.additional_context.as_deref().unwrap_or_default(),
            )
    }
}

/// A [`TaskDefinition`] bound to the collaborators that evaluate it.
#[derive(Debug)]
pub struct DefinedTask {
    definition: TaskDefinition,
    base_project: Option<PathBuf>,
    ctx: Arc<EvaluationContext>,
}

impl DefinedTask {
    pub fn new(definition: TaskDefinition, ctx: Arc<EvaluationContext>) -> Self {
        let base_project = match &definition.evaluation {
            EvaluationStrategy::E2e(lifecycle) => Some(ctx.fixtures.resolve(&lifecycle.base_project)),
            _ => None,
        };
        Self {
            definition,
            base_project,
            ctx,
        }
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }
}

#[async_trait]
impl Task for DefinedTask {
    fn id(&self) -> &str {
        &self.definition.id
    }

    fn name(&self) -> &str {
        &self.definition.name
    }

    fn supported_languages(&self) -> &[Language] {
        &self.definition.languages
    }

    fn evaluation_type(&self) -> EvaluationType {
        self.definition.evaluation.kind()
    }

    fn max_turns(&self) -> u32 {
        self.definition.max_turns
    }

    fn system_prompt(&self) -> Option<&str> {
        self.definition.system_prompt.as_deref()
    }

    fn base_project(&self) -> Option<&Path> {
        self.base_project.as_deref()
    }

    fn build_prompt(&self, input: &TaskInput) -> String {
        self.definition.render_prompt(input)
    }

    async fn evaluate(
        &self,
        response: &TaskResponse,
        input: &TaskInput,
    ) -> anyhow::Result<EvaluationResult> {
        let meta = TaskMeta {
            id: &self.definition.id,
            name: &self.definition.name,
        };
        self.definition
            .evaluation
            .evaluate(&self.ctx, meta, response, input)
            .await
    }
}

/// Errors loading or validating task definitions.
#[derive(Debug, thiserror::Error)]
pub enum TaskDefinitionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureStore;
    use crate::testing::FixedJudge;

    const SUITE: &str = r#"
tasks:
  - id: j01
    name: Code Generation
    languages: [nodejs, java]
    system_prompt: Respond with code only.
    prompt: "LANGUAGE: {language}\nFRAMEWORK: {framework}\nCODE:\n{fixture}\nLOG:\n{context}"
    evaluation:
      type: test-execution
      impl_files: { nodejs: users.js, java: src/main/java/Users.java }
  - id: j10
    name: Performance
    languages: [nodejs]
    max_turns: 2
    prompt: Fix the N+1 query.
    evaluation:
      type: rubric
      criteria:
        - { name: diagnosis, max_points: 3, description: Finds the problem }
  - id: j27
    name: Avatar Menu
    languages: [nodejs]
    max_turns: 3
    prompt: Implement the avatar menu.
    evaluation:
      type: e2e
      base_project: fullstack/base-project
      test_spec: tests/j27-avatar-menu.spec.ts
"#;

    fn ctx() -> Arc<EvaluationContext> {
        Arc::new(EvaluationContext::new(
            FixtureStore::new("/bench/fixtures"),
            Arc::new(FixedJudge::new(3.0, "ok")),
        ))
    }

    #[test]
    fn test_parse_suite() {
        let suite = TaskSuite::parse_yaml(SUITE).unwrap();
        assert_eq!(suite.tasks.len(), 3);
        assert_eq!(suite.tasks[0].max_turns, 1);
        assert_eq!(suite.tasks[1].evaluation.kind(), EvaluationType::Rubric);
    }

    #[test]
    fn test_render_prompt_placeholders() {
        let suite = TaskSuite::parse_yaml(SUITE).unwrap();
        let input = TaskInput {
            language: Language::Java,
            fixture_code: "class Users {}".to_string(),
            additional_context: Some("BUILD FAILED".to_string()),
        };
        let prompt = suite.tasks[0].render_prompt(&input);
        assert_eq!(
            prompt,
            "LANGUAGE: java\nFRAMEWORK: Spring Boot\nCODE:\nclass Users {}\nLOG:\nBUILD FAILED"
        );
    }

    #[test]
    fn test_catalog_exposes_task_contract() {
        let catalog = TaskSuite::parse_yaml(SUITE).unwrap().into_catalog(ctx()).unwrap();
        let j27 = catalog.get("j27").unwrap();
        assert_eq!(j27.evaluation_type(), EvaluationType::E2e);
        assert_eq!(j27.max_turns(), 3);
        assert_eq!(
            j27.base_project(),
            Some(Path::new("/bench/fixtures/fullstack/base-project"))
        );
        let j01 = catalog.get("j01").unwrap();
        assert_eq!(j01.system_prompt(), Some("Respond with code only."));
        assert!(j01.base_project().is_none());
    }

    #[tokio::test]
    async fn test_defined_task_delegates_to_strategy() {
        let catalog = TaskSuite::parse_yaml(SUITE).unwrap().into_catalog(ctx()).unwrap();
        let result = catalog
            .get("j10")
            .unwrap()
            .evaluate(&TaskResponse::text("answer", 1), &TaskInput::new(Language::Nodejs))
            .await
            .unwrap();
        assert!(result.passed);
        assert!((result.score - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_impl_file_rejected() {
        let yaml = r#"
tasks:
  - id: j01
    name: X
    languages: [nodejs, dotnet]
    prompt: p
    evaluation: { type: test-execution, impl_files: { nodejs: users.js } }
"#;
        let err = TaskSuite::parse_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("dotnet"));
    }

    #[test]
    fn test_zero_turns_and_duplicates_rejected() {
        let zero = r#"
tasks:
  - id: j1
    name: One
    languages: [nodejs]
    max_turns: 0
    prompt: p
    evaluation: { type: rubric, criteria: [{ name: a, max_points: 1, description: d }] }
"#;
        let err = TaskSuite::parse_yaml(zero).unwrap_err();
        assert!(err.to_string().contains("max_turns"), "{err}");

        let duplicated = r#"
tasks:
  - id: j1
    name: One
    languages: [nodejs]
    prompt: p
    evaluation: { type: rubric, criteria: [{ name: a, max_points: 1, description: d }] }
  - id: j1
    name: Two
    languages: [nodejs]
    prompt: p
    evaluation: { type: rubric, criteria: [{ name: a, max_points: 1, description: d }] }
"#;
        assert!(matches!(
            TaskSuite::parse_yaml(duplicated),
            Err(TaskDefinitionError::Validation(msg)) if msg.contains("Duplicate")
        ));
    }
}
