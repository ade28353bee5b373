//! Build, serve, and browser-test a generated full-stack project.
//!
//! A project has `backend/`, `frontend/`, and `e2e/` directories. The runner
//! walks a linear lifecycle:
//!
//! 1. install dependencies in both halves (dev dependencies included)
//! 2. build the frontend, then the backend
//! 3. allocate a free port
//! 4. start the server with `PORT` injected
//! 5. poll the health endpoint until it answers
//! 6. run the Playwright spec with a JSON reporter
//! 7. parse the report
//!
//! Any failing step short-circuits the rest. Once the server has been started
//! it is always terminated before [`E2eRunner::run`] returns.
//!
//! A step that exits non-zero (a broken build, a server that never answers)
//! is a verdict on the generated project. A step that could not be started or
//! overran its deadline is an [`E2eRunError`].

use crate::process::{
    CommandSpec, ProcessError, run_with_deadline, spawn_background, terminate_group, truncate,
};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tracing::{debug, info, warn};

const BACKEND_DIR: &str = "backend";
const FRONTEND_DIR: &str = "frontend";
const E2E_DIR: &str = "e2e";
const SERVER_LOG: &str = ".devbench-server.log";

/// Outcome of one lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct E2eRunResult {
    pub passed: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    /// "All tests passed", or the formatted failure details.
    pub output: String,
    pub error_message: Option<String>,
    /// Port the server was started on; `None` if the run ended before that.
    pub server_port: Option<u16>,
}

impl E2eRunResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::default()
        }
    }
}

/// The lifecycle could not produce a verdict.
#[derive(Debug, thiserror::Error)]
pub enum E2eRunError {
    #[error("{step} timed out after {}s", after.as_secs())]
    Timeout { step: String, after: Duration },

    #[error("{step} could not run: {source}")]
    Process {
        step: String,
        #[source]
        source: ProcessError,
    },

    #[error("Failed to allocate a port: {0}")]
    Port(#[source] std::io::Error),
}

impl E2eRunError {
    fn from_process(step: &str, error: ProcessError) -> Self {
        match error {
            ProcessError::Timeout { after, .. } => Self::Timeout {
                step: step.to_string(),
                after,
            },
            source => Self::Process {
                step: step.to_string(),
                source,
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Commands for each lifecycle step. Working directories are filled in by the runner.
#[derive(Debug, Clone)]
pub struct LifecycleCommands {
    /// Run in both `backend/` and `frontend/`.
    pub install: CommandSpec,
    pub frontend_build: CommandSpec,
    pub backend_build: CommandSpec,
    /// Run in `backend/` with `PORT` set.
    pub server: CommandSpec,
    /// Run in `e2e/` with `BASE_URL` set; the spec path is appended.
    pub browser_tests: CommandSpec,
    pub health_path: String,
}

impl Default for LifecycleCommands {
    fn default() -> Self {
        Self {
            install: CommandSpec::new("npm")
                .args(["install", "--silent"])
                .env("NODE_ENV", "development"),
            frontend_build: CommandSpec::new("npx").args(["vite", "build"]),
            backend_build: CommandSpec::new("npx").args(["nest", "build"]),
            server: CommandSpec::new("node")
                .arg("dist/main.js")
                .env("NODE_ENV", "production"),
            browser_tests: CommandSpec::new("npx").args(["playwright", "test", "--reporter=json"]),
            health_path: "/api/health".to_string(),
        }
    }
}

/// Deadlines for each lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    pub install: Duration,
    pub build: Duration,
    pub server_ready: Duration,
    pub browser_tests: Duration,
    pub health_poll_interval: Duration,
    pub health_request: Duration,
    pub kill_grace: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            install: Duration::from_secs(120),
            build: Duration::from_secs(120),
            server_ready: Duration::from_secs(30),
            browser_tests: Duration::from_secs(120),
            health_poll_interval: Duration::from_millis(500),
            health_request: Duration::from_secs(2),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// Runs the full-stack lifecycle for a project directory.
#[derive(Debug, Clone, Default)]
pub struct E2eRunner {
    commands: LifecycleCommands,
    timeouts: LifecycleTimeouts,
}

impl E2eRunner {
    pub fn new(commands: LifecycleCommands, timeouts: LifecycleTimeouts) -> Self {
        Self { commands, timeouts }
    }

    pub async fn run(
        &self,
        project_dir: &Path,
        test_spec: &str,
    ) -> Result<E2eRunResult, E2eRunError> {
        let backend = project_dir.join(BACKEND_DIR);
        let frontend = project_dir.join(FRONTEND_DIR);

        for (label, dir) in [("backend", &backend), ("frontend", &frontend)] {
            let install = self.commands.install.clone().current_dir(dir);
            let step = format!("Dependency install in {label}");
            if let Some(message) = self.step(&install, self.timeouts.install, &step).await? {
                return Ok(E2eRunResult::failure(message));
            }
        }

        let frontend_build = self.commands.frontend_build.clone().current_dir(&frontend);
        if let Some(message) = self
            .step(&frontend_build, self.timeouts.build, "Frontend build")
            .await?
        {
            return Ok(E2eRunResult::failure(message));
        }

        let backend_build = self.commands.backend_build.clone().current_dir(&backend);
        if let Some(message) = self
            .step(&backend_build, self.timeouts.build, "Backend build")
            .await?
        {
            return Ok(E2eRunResult::failure(message));
        }

        let port = allocate_port().await.map_err(E2eRunError::Port)?;

        let server_spec = self
            .commands
            .server
            .clone()
            .env("PORT", port.to_string())
            .current_dir(&backend);
        let mut server = spawn_background(&server_spec, &project_dir.join(SERVER_LOG))
            .map_err(|e| E2eRunError::from_process("Server start", e))?;
        let server_pgid = server.id();
        info!(port, project = %project_dir.display(), "Server started");

        let outcome = self
            .against_server(&mut server, project_dir, port, test_spec)
            .await;

        terminate_group(&mut server, server_pgid, self.timeouts.kill_grace).await;
        debug!(port, "Server stopped");

        let mut result = outcome?;
        result.server_port = Some(port);
        Ok(result)
    }

    async fn against_server(
        &self,
        server: &mut Child,
        project_dir: &Path,
        port: u16,
        test_spec: &str,
    ) -> Result<E2eRunResult, E2eRunError> {
        let base_url = format!("http://127.0.0.1:{port}");
        let health_url = format!("{base_url}{}", self.commands.health_path);

        if let Err(message) = self.wait_for_server(server, &health_url).await {
            let log = std::fs::read_to_string(project_dir.join(SERVER_LOG)).unwrap_or_default();
            let tail = tail_chars(&log, 1000);
            return Ok(E2eRunResult::failure(if tail.trim().is_empty() {
                message
            } else {
                format!("{message}\n{tail}")
            }));
        }

        let browser_tests = self
            .commands
            .browser_tests
            .clone()
            .arg(test_spec)
            .env("BASE_URL", &base_url)
            .current_dir(project_dir.join(E2E_DIR));

        let output = run_with_deadline(&browser_tests, self.timeouts.browser_tests)
            .await
            .map_err(|e| E2eRunError::from_process("Playwright tests", e))?;
        Ok(parse_playwright_report(
            &output.stdout,
            &output.stderr,
            output.exit_code,
        ))
    }

    /// Runs one lifecycle command. Returns the failure message when it exits
    /// non-zero.
    async fn step(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        label: &str,
    ) -> Result<Option<String>, E2eRunError> {
        let output = run_with_deadline(spec, timeout)
            .await
            .map_err(|e| E2eRunError::from_process(label, e))?;
        if output.success() {
            return Ok(None);
        }
        let detail = if output.stderr.trim().is_empty() {
            truncate(&output.stdout, 1000)
        } else {
            truncate(&output.stderr, 1000)
        };
        warn!(step = label, exit_code = ?output.exit_code, "Lifecycle step failed");
        Ok(Some(format!("{label} failed:\n{detail}")))
    }

    async fn wait_for_server(&self, server: &mut Child, url: &str) -> Result<(), String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeouts.health_request)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        let started = Instant::now();

        while started.elapsed() < self.timeouts.server_ready {
            if let Ok(Some(status)) = server.try_wait() {
                return Err(format!("Server exited before becoming ready ({status})"));
            }
            // Any HTTP response means the server is listening.
            if client.get(url).send().await.is_ok() {
                debug!(url, elapsed_ms = started.elapsed().as_millis() as u64, "Server ready");
                return Ok(());
            }
            tokio::time::sleep(self.timeouts.health_poll_interval).await;
        }

        Err(format!(
            "Server did not start within {}ms",
            self.timeouts.server_ready.as_millis()
        ))
    }
}

/// Binds an ephemeral port on loopback and releases it.
pub async fn allocate_port() -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    match s.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[derive(Debug, Deserialize)]
struct PlaywrightReport {
    #[serde(default)]
    suites: Vec<PlaywrightSuite>,
}

#[derive(Debug, Deserialize)]
struct PlaywrightSuite {
    #[serde(default)]
    specs: Vec<PlaywrightSpec>,
    #[serde(default)]
    suites: Vec<PlaywrightSuite>,
}

#[derive(Debug, Deserialize)]
struct PlaywrightSpec {
    #[serde(default)]
    title: String,
    #[serde(default)]
    tests: Vec<PlaywrightTest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaywrightTest {
    title: Option<String>,
    project_name: Option<String>,
    #[serde(default)]
    results: Vec<PlaywrightResult>,
}

#[derive(Debug, Deserialize)]
struct PlaywrightResult {
    #[serde(default)]
    status: String,
    error: Option<PlaywrightError>,
}

#[derive(Debug, Deserialize)]
struct PlaywrightError {
    message: Option<String>,
}

#[derive(Default)]
struct Tally {
    total: u32,
    passed: u32,
    failures: Vec<String>,
}

impl Tally {
    fn walk(&mut self, suite: &PlaywrightSuite) {
        for spec in &suite.specs {
            for test in &spec.tests {
                self.total += 1;
                // Only the final retry counts.
                let last = test.results.last();
                if last.is_some_and(|r| r.status == "passed") {
                    self.passed += 1;
                } else {
                    let error = last
                        .and_then(|r| r.error.as_ref())
                        .and_then(|e| e.message.as_deref())
                        .unwrap_or("Unknown failure");
                    let label = test
                        .title
                        .as_deref()
                        .or(test.project_name.as_deref())
                        .unwrap_or("test");
                    self.failures
                        .push(format!("FAIL: {} > {label}\n  {error}", spec.title));
                }
            }
        }
        for nested in &suite.suites {
            self.walk(nested);
        }
    }
}

/// Turns Playwright's JSON reporter output into a run result.
///
/// Unparseable output degrades to trusting the exit code.
pub fn parse_playwright_report(stdout: &str, stderr: &str, exit_code: Option<i32>) -> E2eRunResult {
    let json = stdout.trim();
    if json.is_empty() {
        let stderr = stderr.trim();
        return E2eRunResult {
            output: if stderr.is_empty() {
                "No Playwright output".to_string()
            } else {
                stderr.to_string()
            },
            error_message: Some(if stderr.is_empty() {
                "Playwright produced no output".to_string()
            } else {
                stderr.to_string()
            }),
            ..E2eRunResult::default()
        };
    }

    match serde_json::from_str::<PlaywrightReport>(json) {
        Ok(report) => {
            let mut tally = Tally::default();
            for suite in &report.suites {
                tally.walk(suite);
            }
            let failed = tally.total - tally.passed;
            E2eRunResult {
                passed: failed == 0 && tally.total > 0,
                total_tests: tally.total,
                passed_tests: tally.passed,
                failed_tests: failed,
                output: if tally.failures.is_empty() {
                    "All tests passed".to_string()
                } else {
                    tally.failures.join("\n\n")
                },
                error_message: None,
                server_port: None,
            }
        }
        Err(e) => {
            debug!(error = %e, "Playwright report is not valid JSON");
            let ok = exit_code == Some(0);
            E2eRunResult {
                passed: ok,
                total_tests: 0,
                passed_tests: u32::from(ok),
                failed_tests: u32::from(!ok),
                output: if stdout.is_empty() { stderr } else { stdout }.to_string(),
                error_message: Some(format!(
                    "Failed to parse Playwright JSON output: {}",
                    truncate(stderr, 300)
                )),
                server_port: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED_REPORT: &str = r#"{
      "suites": [{
        "title": "login.spec.ts",
        "specs": [{
          "title": "shows form",
          "tests": [{"projectName": "chromium", "results": [{"status": "passed"}]}]
        }],
        "suites": [{
          "title": "validation",
          "specs": [],
          "suites": [{
            "title": "deep",
            "specs": [{
              "title": "rejects empty password",
              "tests": [{"projectName": "chromium", "results": [
                {"status": "failed", "error": {"message": "first try"}},
                {"status": "failed", "error": {"message": "expected error banner"}}
              ]}]
            }]
          }]
        }]
      }]
    }"#;

    #[test]
    fn test_parse_walks_nested_suites() {
        let result = parse_playwright_report(NESTED_REPORT, "", Some(1));
        assert_eq!(result.total_tests, 2);
        assert_eq!(result.passed_tests, 1);
        assert_eq!(result.failed_tests, 1);
        assert!(!result.passed);
        assert_eq!(
            result.output,
            "FAIL: rejects empty password > chromium\n  expected error banner"
        );
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_parse_all_passing() {
        let json = r#"{"suites":[{"specs":[{"title":"a","tests":[{"results":[{"status":"failed"},{"status":"passed"}]}]}]}]}"#;
        let result = parse_playwright_report(json, "", Some(0));
        assert!(result.passed);
        assert_eq!(result.output, "All tests passed");
    }

    #[test]
    fn test_parse_zero_tests_is_not_a_pass() {
        let result = parse_playwright_report(r#"{"suites":[]}"#, "", Some(0));
        assert!(!result.passed);
        assert_eq!(result.total_tests, 0);
    }

    #[test]
    fn test_parse_failure_trusts_exit_code() {
        let result = parse_playwright_report("Running 3 tests...", "warning: x", Some(0));
        assert!(result.passed);
        assert_eq!(result.passed_tests, 1);
        assert!(
            result
                .error_message
                .unwrap()
                .starts_with("Failed to parse Playwright JSON output: warning: x")
        );

        let result = parse_playwright_report("garbage", "", Some(1));
        assert!(!result.passed);
        assert_eq!(result.failed_tests, 1);
    }

    #[test]
    fn test_parse_empty_output() {
        let result = parse_playwright_report("   ", "browser missing", Some(1));
        assert!(!result.passed);
        assert_eq!(result.error_message.as_deref(), Some("browser missing"));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[tokio::test]
    async fn test_allocate_port_is_nonzero() {
        assert_ne!(allocate_port().await.unwrap(), 0);
    }
}
