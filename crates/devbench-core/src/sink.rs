//! Destinations for finished results.
//!
//! Results are handed over one at a time as combinations finish. Every sink
//! must tolerate concurrent callers.

use devbench_proto::{BenchmarkResult, ResultStatus};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error writing results: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize result: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives each finished result as soon as it is ready.
pub trait ResultSink: Send + Sync {
    /// Announces the number of planned combinations before the first record.
    fn set_total(&self, _total: usize) {}

    fn record(&self, result: &BenchmarkResult) -> Result<(), SinkError>;
}

/// Appends one JSON object per line, flushing after each record.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Creates `benchmark_<YYYYMMDD_HHMMSS>.jsonl` inside `output_dir`.
    pub fn create_in(output_dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(output_dir)?;
        let name = format!(
            "benchmark_{}.jsonl",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        Self::open(output_dir.join(name))
    }

    /// Opens (or creates) a specific file in append mode.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonlSink {
    fn record(&self, result: &BenchmarkResult) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Keeps results in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<BenchmarkResult>>,
    total: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<BenchmarkResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ResultSink for MemorySink {
    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn record(&self, result: &BenchmarkResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }
}

/// Forwards to several sinks; the first error is returned after all were tried.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ResultSink>) {
        self.sinks.push(sink);
    }
}

impl ResultSink for FanoutSink {
    fn set_total(&self, total: usize) {
        for sink in &self.sinks {
            sink.set_total(total);
        }
    }

    fn record(&self, result: &BenchmarkResult) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(result) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Logs one line per finished combination.
#[derive(Debug, Default)]
pub struct ProgressSink {
    total: AtomicUsize,
    done: AtomicUsize,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `[PASS] j01 | Claude Sonnet | nodejs | run 1 | 1234ms | $0.0123 (25%)`
pub fn progress_line(result: &BenchmarkResult, done: usize, total: usize) -> String {
    let pct = if total == 0 { 100 } else { done * 100 / total };
    let mut line = format!(
        "[{}] {} | {} | {} | run {} | {}ms | ${:.4} ({pct}%)",
        result.status().as_str(),
        result.task_id,
        result.display_name,
        result.language,
        result.run_number,
        result.latency_ms,
        result.cost_usd,
    );
    if result.turns > 1 {
        line.push_str(&format!(" | turns {}", result.turns));
    }
    line
}

impl ResultSink for ProgressSink {
    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn record(&self, result: &BenchmarkResult) -> Result<(), SinkError> {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        info!("{}", progress_line(result, done, total));
        Ok(())
    }
}

/// Aggregates for one executor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutorSummary {
    pub display_name: String,
    pub results: usize,
    pub passed: usize,
    /// Combinations that never produced a response.
    pub infrastructure_failures: usize,
    /// Pass rate over combinations that produced a response.
    pub pass_rate: f64,
    pub mean_score: f64,
    pub total_cost_usd: f64,
    pub median_latency_ms: u64,
}

/// Closing summary of a run, keyed by executor id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub executors: BTreeMap<String, ExecutorSummary>,
    pub total: usize,
    pub passed: usize,
    pub errors: usize,
    pub total_cost_usd: f64,
}

impl RunSummary {
    /// Infrastructure failures are excluded from pass rates, scores, and latency.
    pub fn from_results(results: &[BenchmarkResult]) -> Self {
        let mut grouped: BTreeMap<&str, Vec<&BenchmarkResult>> = BTreeMap::new();
        for r in results {
            grouped.entry(r.executor_id.as_str()).or_default().push(r);
        }

        let executors = grouped
            .into_iter()
            .map(|(id, rows)| {
                let answered: Vec<_> = rows
                    .iter()
                    .filter(|r| !r.is_infrastructure_failure())
                    .collect();
                let passed = rows.iter().filter(|r| r.passed).count();
                let mut latencies: Vec<u64> = answered.iter().map(|r| r.latency_ms).collect();
                latencies.sort_unstable();
                let summary = ExecutorSummary {
                    display_name: rows[0].display_name.clone(),
                    results: rows.len(),
                    passed,
                    infrastructure_failures: rows.len() - answered.len(),
                    pass_rate: ratio(passed, answered.len()),
                    mean_score: if answered.is_empty() {
                        0.0
                    } else {
                        answered.iter().map(|r| r.score).sum::<f64>() / answered.len() as f64
                    },
                    total_cost_usd: rows.iter().map(|r| r.cost_usd).sum(),
                    median_latency_ms: latencies.get(latencies.len() / 2).copied().unwrap_or(0),
                };
                (id.to_string(), summary)
            })
            .collect();

        Self {
            executors,
            total: results.len(),
            passed: results.iter().filter(|r| r.passed).count(),
            errors: results
                .iter()
                .filter(|r| r.status() == ResultStatus::Error)
                .count(),
            total_cost_usd: results.iter().map(|r| r.cost_usd).sum(),
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
