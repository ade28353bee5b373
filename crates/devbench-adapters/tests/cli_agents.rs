//! CLI and project executors against shell scripts standing in for agents.
#![cfg(unix)]

use devbench_adapters::{CliAgent, CliExecutor, ProjectExecutor};
use devbench_core::testing::{PassRule, ScriptedTask};
use devbench_core::{FixtureStore, MemorySink, Orchestrator, RunOptions, Task};
use devbench_proto::{
    ExecutionError, ExecutionMode, ExecutionRequest, Executor, ExecutorInfo, Pricing,
    TokensSource,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn info(id: &str) -> ExecutorInfo {
    ExecutorInfo {
        id: id.to_string(),
        provider: format!("cli-{id}"),
        display_name: id.to_string(),
        model_id: format!("{id}-agent"),
        mode: ExecutionMode::Cli,
        pricing: Pricing::new(1.0, 1.0),
    }
}

/// An agent running `script` with the prompt file path as `$1`.
fn script_agent(script: &str) -> CliAgent {
    CliAgent::custom(
        "sh",
        vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            "{prompt_file}".to_string(),
        ],
    )
}

fn recorded_path(dir: &Path) -> PathBuf {
    PathBuf::from(fs::read_to_string(dir.join("path")).unwrap().trim())
}

#[tokio::test]
async fn test_text_mode_reads_prompt_file_and_cleans_up() {
    let scratch = TempDir::new().unwrap();
    let mut agent = script_agent(r#"printf '%s' "$1" > "$SCRATCH/path"; cat "$1""#);
    agent
        .env
        .insert("SCRATCH".to_string(), scratch.path().display().to_string());
    let executor = CliExecutor::new(info("echo"), agent, Duration::from_secs(10));

    let prompt = "Write a function that adds two numbers.";
    let result = executor.execute(&ExecutionRequest::new(prompt)).await.unwrap();

    assert_eq!(result.content, prompt);
    assert_eq!(result.tokens_source, TokensSource::Estimated);
    assert_eq!(result.input_tokens, 10);
    assert_eq!(result.output_tokens, 10);
    assert_eq!(result.mode, ExecutionMode::Cli);
    assert_eq!(result.model_id, "echo-agent");
    assert!(!recorded_path(scratch.path()).exists());
}

#[tokio::test]
async fn test_timeout_kills_agent_and_removes_prompt_file() {
    let scratch = TempDir::new().unwrap();
    let mut agent = script_agent(r#"printf '%s' "$1" > "$SCRATCH/path"; sleep 30"#);
    agent
        .env
        .insert("SCRATCH".to_string(), scratch.path().display().to_string());
    let executor = CliExecutor::new(info("slow"), agent, Duration::from_millis(300));

    let started = std::time::Instant::now();
    let err = executor
        .execute(&ExecutionRequest::new("hello"))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!recorded_path(scratch.path()).exists());
}

#[tokio::test]
async fn test_throttled_agent_is_rate_limited() {
    let agent = script_agent("echo 'Error: 429 Too Many Requests' >&2; exit 1");
    let executor = CliExecutor::new(info("busy"), agent, Duration::from_secs(10));
    let err = executor
        .execute(&ExecutionRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ExecutionError::RateLimited { provider, .. } if provider == "cli-busy"),
        "{err}"
    );
}

#[tokio::test]
async fn test_missing_binary_is_process_error() {
    let agent = CliAgent::custom("definitely_not_a_real_agent_xyz", Vec::new());
    let executor = CliExecutor::new(info("ghost"), agent, Duration::from_secs(5));
    let err = executor
        .execute(&ExecutionRequest::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Process(_)), "{err}");
}

fn template() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("backend")).unwrap();
    fs::write(dir.path().join("backend/server.js"), "// stub\n").unwrap();
    dir
}

fn project_agent(script: &str, root: &Path) -> CliExecutor {
    let agent = script_agent(script);
    let projects = ProjectExecutor::new(
        info("builder"),
        agent.clone(),
        Duration::from_secs(10),
        root,
    );
    CliExecutor::new(info("builder"), agent, Duration::from_secs(10)).with_projects(projects)
}

#[tokio::test]
async fn test_project_turns_share_one_copy() {
    let template = template();
    let root = TempDir::new().unwrap();
    let executor = project_agent(r#"cat "$1" >> notes.txt; echo done"#, root.path());

    let mut request = ExecutionRequest::new("turn one\n");
    request.template_dir = Some(template.path().to_path_buf());
    let first = executor.execute(&request).await.unwrap();

    let project = first.project_dir.clone().unwrap();
    assert!(project.starts_with(root.path()));
    assert_eq!(first.mode, ExecutionMode::Project);
    assert_eq!(first.content, "done");
    assert!(project.join("backend/server.js").exists());

    let mut request = ExecutionRequest::new("turn two\n");
    request.template_dir = Some(template.path().to_path_buf());
    request.project_dir = Some(project.clone());
    let second = executor.execute(&request).await.unwrap();

    assert_eq!(second.project_dir.as_deref(), Some(project.as_path()));
    assert_eq!(
        fs::read_to_string(project.join("notes.txt")).unwrap(),
        "turn one\nturn two\n"
    );
    assert!(!template.path().join("notes.txt").exists());
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_failed_first_turn_removes_its_copy() {
    let template = template();
    let root = TempDir::new().unwrap();
    let executor = project_agent("echo 'npm ERR!' >&2; exit 2", root.path());

    let mut request = ExecutionRequest::new("build it");
    request.template_dir = Some(template.path().to_path_buf());
    let err = executor.execute(&request).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Process(msg) if msg.contains("npm ERR!")));
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_orchestrated_run_through_a_cli_agent() {
    let fixtures = TempDir::new().unwrap();
    let agent = script_agent(r#"cat "$1""#);
    let executor: Arc<dyn Executor> =
        Arc::new(CliExecutor::new(info("echo"), agent, Duration::from_secs(10)));
    let task: Arc<dyn Task> = Arc::new(
        ScriptedTask::new("j01").pass_when(PassRule::ContentContains("Solve j01".to_string())),
    );

    let options = RunOptions {
        runs_per_combo: 2,
        ..RunOptions::default()
    };
    let orchestrator =
        Orchestrator::new(vec![executor], FixtureStore::new(fixtures.path()), options).unwrap();
    let sink = MemorySink::new();
    let results = orchestrator.run(&[task], &sink).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(sink.total(), 2);
    for result in &results {
        assert!(result.passed, "{result:?}");
        assert_eq!(result.turns, 1);
        assert_eq!(result.tokens_source, TokensSource::Estimated);
        assert!(result.cost_usd > 0.0);
    }
}
