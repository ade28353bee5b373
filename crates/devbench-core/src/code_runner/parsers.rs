//! One pure parser per test-runtime output format.
//!
//! Each parser returns `None` when the output is not in the expected shape;
//! the caller then falls back to the process exit code.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

/// Normalized pass/fail counts from any runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    /// The runtime's own overall verdict, where it reports one.
    pub success: bool,
}

impl TestSummary {
    /// Builds a summary whose verdict is derived from the counts.
    pub fn from_counts(total: u32, passed: u32, failed: u32) -> Self {
        Self {
            total,
            passed,
            failed,
            success: failed == 0 && total > 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.success && self.failed == 0
    }

    /// One-line human summary: "All N tests passed" or "F/T tests failed".
    pub fn notes(&self) -> String {
        if self.passed() {
            format!("All {} tests passed", self.passed)
        } else {
            format!("{}/{} tests failed", self.failed, self.total)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    success: bool,
    #[serde(default)]
    num_total_tests: u32,
    #[serde(default)]
    num_passed_tests: u32,
    #[serde(default)]
    num_failed_tests: u32,
}

/// Parses `jest --json` output. Leading noise before the first `{` is skipped.
pub fn parse_jest_json(stdout: &str) -> Option<TestSummary> {
    let start = stdout.find('{')?;
    let mut stream = serde_json::Deserializer::from_str(&stdout[start..]).into_iter::<JestReport>();
    let report = stream.next()?.ok()?;
    Some(TestSummary {
        total: report.num_total_tests,
        passed: report.num_passed_tests,
        failed: report.num_failed_tests,
        success: report.success,
    })
}

static TESTSUITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<testsuite\b([^>]*)>").expect("testsuite pattern is valid"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(tests|failures|errors)\s*=\s*"(\d+)""#).expect("attribute pattern is valid")
});

/// Counts from one Surefire report: `(tests, failures, errors)`.
pub fn parse_surefire_xml(xml: &str) -> Option<(u32, u32, u32)> {
    let mut found = false;
    let (mut tests, mut failures, mut errors) = (0, 0, 0);

    for suite in TESTSUITE_RE.captures_iter(xml) {
        found = true;
        let attrs = suite.get(1).map(|m| m.as_str()).unwrap_or_default();
        for attr in ATTR_RE.captures_iter(attrs) {
            let value: u32 = attr[2].parse().ok()?;
            match &attr[1] {
                "tests" => tests += value,
                "failures" => failures += value,
                "errors" => errors += value,
                _ => {}
            }
        }
    }

    found.then_some((tests, failures, errors))
}

/// Aggregates every `TEST-*.xml` report in a Surefire reports directory.
pub fn parse_surefire_reports(reports_dir: &Path) -> Option<TestSummary> {
    let entries = std::fs::read_dir(reports_dir).ok()?;
    let mut any = false;
    let (mut tests, mut failed) = (0u32, 0u32);

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with("TEST-") && name.ends_with(".xml")) {
            continue;
        }
        let Ok(xml) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some((t, f, e)) = parse_surefire_xml(&xml) {
            any = true;
            tests += t;
            failed += f + e;
        }
    }

    any.then(|| TestSummary::from_counts(tests, tests.saturating_sub(failed), failed))
}

static DOTNET_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Passed|Failed|Skipped|Total(?: tests)?)\s*:\s*(\d+)")
        .expect("dotnet count pattern is valid")
});

/// Parses the `dotnet test` summary line.
///
/// Accepts both `Failed: 0, Passed: 5, Skipped: 0, Total: 5` and the older
/// `Total tests: 5. Passed: 5. Failed: 0.` forms.
pub fn parse_dotnet_summary(stdout: &str) -> Option<TestSummary> {
    let line = stdout
        .lines()
        .find(|line| line.contains("Total") && DOTNET_COUNT_RE.is_match(line))?;

    let (mut total, mut passed, mut failed) = (None, None, None);
    for caps in DOTNET_COUNT_RE.captures_iter(line) {
        let value: u32 = caps[2].parse().ok()?;
        let key = caps[1].to_ascii_lowercase();
        match key.as_str() {
            "passed" => passed = Some(value),
            "failed" => failed = Some(value),
            k if k.starts_with("total") => total = Some(value),
            _ => {}
        }
    }

    let total = total?;
    let failed = failed.unwrap_or(0);
    let passed = passed.unwrap_or_else(|| total.saturating_sub(failed));
    Some(TestSummary::from_counts(total, passed, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jest_all_passing() {
        let stdout = r#"{"success":true,"numTotalTests":4,"numPassedTests":4,"numFailedTests":0,"testResults":[]}"#;
        let summary = parse_jest_json(stdout).unwrap();
        assert!(summary.passed());
        assert_eq!(summary.notes(), "All 4 tests passed");
    }

    #[test]
    fn test_jest_with_leading_noise_and_failures() {
        let stdout = "npm warn something\n{\"success\":false,\"numTotalTests\":5,\"numPassedTests\":3,\"numFailedTests\":2}\ntrailing";
        let summary = parse_jest_json(stdout).unwrap();
        assert!(!summary.passed());
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.notes(), "2/5 tests failed");
    }

    #[test]
    fn test_jest_success_flag_is_respected() {
        // A suite that fails to compile reports success=false with zero failed tests.
        let stdout = r#"{"success":false,"numTotalTests":0,"numPassedTests":0,"numFailedTests":0}"#;
        assert!(!parse_jest_json(stdout).unwrap().passed());
    }

    #[test]
    fn test_jest_rejects_garbage() {
        assert!(parse_jest_json("no json here").is_none());
        assert!(parse_jest_json("{ not json").is_none());
        assert!(parse_jest_json(r#"{"unrelated": 1}"#).is_none());
    }

    #[test]
    fn test_surefire_xml_attributes() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" name="UsersTest" time="0.05" tests="6" errors="1" skipped="0" failures="2">
  <testcase name="a" classname="UsersTest" time="0.01"/>
</testsuite>"#;
        assert_eq!(parse_surefire_xml(xml), Some((6, 2, 1)));
        assert_eq!(parse_surefire_xml("<html></html>"), None);
    }

    #[test]
    fn test_surefire_reports_aggregate_across_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("TEST-UsersTest.xml"),
            r#"<testsuite name="UsersTest" tests="3" failures="0" errors="0"></testsuite>"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("TEST-OrdersTest.xml"),
            r#"<testsuite name="OrdersTest" tests="2" failures="1" errors="0"></testsuite>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("UsersTest.txt"), "ignored").unwrap();

        let summary = parse_surefire_reports(dir.path()).unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.passed, 4);
        assert!(!summary.passed());
    }

    #[test]
    fn test_surefire_reports_missing_dir() {
        assert!(parse_surefire_reports(Path::new("/nonexistent/surefire-reports")).is_none());
        let empty = tempfile::tempdir().unwrap();
        assert!(parse_surefire_reports(empty.path()).is_none());
    }

    #[test]
    fn test_dotnet_modern_summary() {
        let stdout = "  Determining projects to restore...\n\
                      Passed!  - Failed:     0, Passed:     5, Skipped:     0, Total:     5, Duration: 42 ms - Tests.dll (net8.0)\n";
        let summary = parse_dotnet_summary(stdout).unwrap();
        assert!(summary.passed());
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 5);
    }

    #[test]
    fn test_dotnet_failed_summary() {
        let stdout = "Failed!  - Failed:     2, Passed:     3, Skipped:     0, Total:     5";
        let summary = parse_dotnet_summary(stdout).unwrap();
        assert!(!summary.passed());
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.notes(), "2/5 tests failed");
    }

    #[test]
    fn test_dotnet_legacy_summary() {
        let stdout = "Test Run Successful.\nTotal tests: 7. Passed: 7. Failed: 0. Skipped: 0.\n";
        let summary = parse_dotnet_summary(stdout).unwrap();
        assert!(summary.passed());
        assert_eq!(summary.total, 7);
    }

    #[test]
    fn test_dotnet_without_summary() {
        assert!(parse_dotnet_summary("error CS1002: ; expected\nBuild FAILED.").is_none());
    }
}
