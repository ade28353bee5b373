//! Running a candidate implementation against a pre-existing test suite.
//!
//! The runner writes the extracted code to the file the suite imports, runs
//! the language's native test command with a deadline, and normalizes the
//! runtime's report into a [`CodeRunResult`]. The written file is removed on
//! every exit path so fixture directories stay pristine between runs.
//!
//! A run that produced a verdict, even a failing one, is `Ok`. A runtime that
//! could not be started or overran its deadline is a [`CodeRunError`]: nothing
//! was learned about the candidate code.

mod extract;
mod parsers;

pub use extract::extract_code;
pub use parsers::{
    TestSummary, parse_dotnet_summary, parse_jest_json, parse_surefire_reports,
    parse_surefire_xml,
};

use crate::process::{CommandSpec, ProcessError, run_with_deadline, truncate};
use devbench_proto::Language;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

const FALLBACK_OUTPUT_CHARS: usize = 2000;
const FALLBACK_ERROR_CHARS: usize = 500;

/// The test runtime failed to produce a verdict.
#[derive(Debug, thiserror::Error)]
pub enum CodeRunError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(Language),

    #[error("failed to write {}: {source}", path.display())]
    WriteImpl {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Test execution timeout after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error(transparent)]
    Process(ProcessError),
}

impl CodeRunError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Verdict of one test-suite run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeRunResult {
    pub passed: bool,
    /// Summary notes, or truncated stdout when the report could not be parsed.
    pub output: String,
    pub error_message: Option<String>,
    /// Parsed counts; `None` when the verdict came from the exit code alone.
    pub summary: Option<TestSummary>,
}

impl CodeRunResult {
    /// Number of failed tests, when known.
    pub fn failed_count(&self) -> Option<u32> {
        self.summary.map(|s| s.failed)
    }
}

/// Where a runtime leaves its structured results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    /// `jest --json` summary on stdout.
    JestJson,
    /// Surefire `TEST-*.xml` files, relative to the test directory.
    SurefireXml { reports_dir: PathBuf },
    /// `dotnet test` summary line on stdout.
    DotnetText,
}

/// The test command for one language and how to read its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProfile {
    /// Command to run; the working directory is set to the test directory.
    pub command: CommandSpec,
    pub timeout: Duration,
    pub format: ReportFormat,
}

impl RuntimeProfile {
    pub fn jest() -> Self {
        Self {
            command: CommandSpec::new("npx")
                .args(["jest", "--json", "--forceExit", "--testTimeout=30000"])
                .env("CI", "true"),
            timeout: Duration::from_secs(60),
            format: ReportFormat::JestJson,
        }
    }

    pub fn maven() -> Self {
        Self {
            command: CommandSpec::new("mvn").args(["-q", "-B", "test"]),
            timeout: Duration::from_secs(180),
            format: ReportFormat::SurefireXml {
                reports_dir: PathBuf::from("target/surefire-reports"),
            },
        }
    }

    pub fn dotnet() -> Self {
        Self {
            command: CommandSpec::new("dotnet").args(["test", "--nologo"]),
            timeout: Duration::from_secs(180),
            format: ReportFormat::DotnetText,
        }
    }

    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Nodejs => Self::jest(),
            Language::Java => Self::maven(),
            Language::Dotnet => Self::dotnet(),
        }
    }
}

/// Dispatches test runs to per-language runtime profiles.
///
/// Runs against the same suite directory are serialized: the implementation
/// file is shared state for the duration of a run.
#[derive(Debug, Clone)]
pub struct CodeRunner {
    profiles: HashMap<Language, RuntimeProfile>,
    dir_locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Default for CodeRunner {
    fn default() -> Self {
        Self {
            profiles: Language::ALL
                .into_iter()
                .map(|lang| (lang, RuntimeProfile::for_language(lang)))
                .collect(),
            dir_locks: Arc::default(),
        }
    }
}

impl CodeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the profile used for `language`.
    pub fn with_profile(mut self, language: Language, profile: RuntimeProfile) -> Self {
        self.profiles.insert(language, profile);
        self
    }

    pub fn profile(&self, language: Language) -> Option<&RuntimeProfile> {
        self.profiles.get(&language)
    }

    /// Runs `test_dir`'s suite against the code extracted from `response`.
    ///
    /// `impl_file` is relative to `test_dir` and is deleted afterwards.
    pub async fn run_tests(
        &self,
        response: &str,
        language: Language,
        test_dir: &Path,
        impl_file: &str,
    ) -> Result<CodeRunResult, CodeRunError> {
        let Some(profile) = self.profiles.get(&language) else {
            return Err(CodeRunError::UnsupportedLanguage(language));
        };

        let dir_lock = self.lock_for(test_dir);
        let _dir_guard = dir_lock.lock().await;

        let impl_path = test_dir.join(impl_file);
        let _cleanup = scopeguard::guard(impl_path.clone(), |path| {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove implementation file");
            }
        });

        let code = extract_code(response);
        write_impl(&impl_path, &code)
            .await
            .map_err(|source| CodeRunError::WriteImpl {
                path: impl_path.clone(),
                source,
            })?;

        if let ReportFormat::SurefireXml { reports_dir } = &profile.format {
            // Stale reports from an earlier run would otherwise be counted.
            let _ = tokio::fs::remove_dir_all(test_dir.join(reports_dir)).await;
        }

        let command = profile.command.clone().current_dir(test_dir);
        debug!(%language, test_dir = %test_dir.display(), impl_file, "Running test suite");

        let output = run_with_deadline(&command, profile.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Timeout { after, .. } => CodeRunError::Timeout { after },
                other => CodeRunError::Process(other),
            })?;

        let summary = match &profile.format {
            ReportFormat::JestJson => parse_jest_json(&output.stdout),
            ReportFormat::SurefireXml { reports_dir } => {
                parse_surefire_reports(&test_dir.join(reports_dir))
            }
            ReportFormat::DotnetText => parse_dotnet_summary(&output.stdout),
        };

        Ok(match summary {
            Some(summary) => CodeRunResult {
                passed: summary.passed(),
                output: summary.notes(),
                error_message: None,
                summary: Some(summary),
            },
            None => {
                debug!(%language, exit_code = ?output.exit_code, "Unparseable test report, using exit code");
                let passed = output.success();
                CodeRunResult {
                    passed,
                    output: truncate(&output.stdout, FALLBACK_OUTPUT_CHARS).to_string(),
                    error_message: (!passed)
                        .then(|| truncate(&output.stderr, FALLBACK_ERROR_CHARS).to_string()),
                    summary: None,
                }
            }
        })
    }
}

impl CodeRunner {
    fn lock_for(&self, test_dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.dir_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(test_dir.to_path_buf()).or_default().clone()
    }
}

async fn write_impl(path: &Path, code: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, code).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_profile(script: &str, format: ReportFormat) -> RuntimeProfile {
        RuntimeProfile {
            command: CommandSpec::shell(script),
            timeout: Duration::from_secs(10),
            format,
        }
    }

    #[tokio::test]
    async fn test_fallback_to_exit_code_when_report_is_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CodeRunner::new().with_profile(
            Language::Nodejs,
            shell_profile("echo plain text; echo boom >&2; exit 1", ReportFormat::JestJson),
        );

        let result = runner
            .run_tests("x", Language::Nodejs, dir.path(), "impl.js")
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.output.trim(), "plain text");
        assert_eq!(result.error_message.as_deref().map(str::trim), Some("boom"));
        assert!(result.summary.is_none());
        assert!(!dir.path().join("impl.js").exists());
    }

    #[tokio::test]
    async fn test_fallback_success_has_no_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CodeRunner::new().with_profile(
            Language::Dotnet,
            shell_profile("echo ok", ReportFormat::DotnetText),
        );
        let result = runner
            .run_tests("x", Language::Dotnet, dir.path(), "Fixture.cs")
            .await
            .unwrap();
        assert!(result.passed);
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut profile = shell_profile("sleep 30", ReportFormat::JestJson);
        profile.timeout = Duration::from_millis(200);
        let runner = CodeRunner::new().with_profile(Language::Nodejs, profile);

        let err = runner
            .run_tests("x", Language::Nodejs, dir.path(), "impl.js")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Test execution timeout after 200ms");
        assert!(!dir.path().join("impl.js").exists());
    }

    #[tokio::test]
    async fn test_surefire_reports_are_read_and_stale_ones_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("target/surefire-reports");
        std::fs::create_dir_all(&reports).unwrap();
        std::fs::write(
            reports.join("TEST-Stale.xml"),
            r#"<testsuite tests="9" failures="9" errors="0"></testsuite>"#,
        )
        .unwrap();

        let script = r#"mkdir -p target/surefire-reports && printf '<testsuite tests="3" failures="0" errors="0"></testsuite>' > target/surefire-reports/TEST-UsersTest.xml"#;
        let runner = CodeRunner::new().with_profile(
            Language::Java,
            shell_profile(
                script,
                ReportFormat::SurefireXml {
                    reports_dir: PathBuf::from("target/surefire-reports"),
                },
            ),
        );

        let result = runner
            .run_tests(
                "```java\npublic class Fixture {}\n```",
                Language::Java,
                dir.path(),
                "src/main/java/Fixture.java",
            )
            .await
            .unwrap();
        assert!(result.passed, "{result:?}");
        assert_eq!(result.output, "All 3 tests passed");
        assert_eq!(result.failed_count(), Some(0));
        assert!(!dir.path().join("src/main/java/Fixture.java").exists());
    }

    #[tokio::test]
    async fn test_missing_runtime_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CodeRunner::new().with_profile(
            Language::Nodejs,
            RuntimeProfile {
                command: CommandSpec::new("devbench-missing-runtime-xyz"),
                timeout: Duration::from_secs(1),
                format: ReportFormat::JestJson,
            },
        );
        let err = runner
            .run_tests("x", Language::Nodejs, dir.path(), "impl.js")
            .await
            .unwrap_err();
        assert!(matches!(err, CodeRunError::Process(ProcessError::Spawn { .. })));
        assert!(err.to_string().contains("devbench-missing-runtime-xyz"));
    }
}
