//! Terminal progress bar for interactive runs.

use devbench_core::sink::progress_line;
use devbench_core::{ResultSink, SinkError};
use devbench_proto::BenchmarkResult;
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Draws a bar on stderr and prints one line per finished combination above it.
#[derive(Debug)]
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ResultSink for BarSink {
    fn set_total(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn record(&self, result: &BenchmarkResult) -> Result<(), SinkError> {
        self.bar.inc(1);
        let done = self.bar.position() as usize;
        let total = self.bar.length().unwrap_or(0) as usize;
        self.bar.println(progress_line(result, done, total));
        self.bar
            .set_message(format!("{} / {}", result.task_id, result.display_name));
        Ok(())
    }
}
