//! Plain-text tables printed by the subcommands.

use devbench_core::{Combination, RunSummary, Task};
use std::fmt::Write;
use std::sync::Arc;

pub fn render_tasks(tasks: &[Arc<dyn Task>]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:<16} {:<6} {:<24} NAME",
        "ID", "EVALUATION", "TURNS", "LANGUAGES"
    );
    for task in tasks {
        let languages: Vec<&str> = task.supported_languages().iter().map(|l| l.as_str()).collect();
        let _ = writeln!(
            out,
            "{:<8} {:<16} {:<6} {:<24} {}",
            task.id(),
            task.evaluation_type().as_str(),
            task.max_turns(),
            languages.join(","),
            task.name()
        );
    }
    out
}

/// One line per combination, in execution-plan order, followed by per-executor counts.
pub fn render_plan(plan: &[Combination]) -> String {
    let mut out = String::new();
    for combo in plan {
        let info = combo.executor.info();
        let _ = writeln!(
            out,
            "{} | {} ({}, {}) | {} | run {}",
            combo.task.id(),
            info.display_name,
            info.mode,
            info.provider,
            combo.language,
            combo.run_number
        );
    }

    let mut per_executor: Vec<(String, usize)> = Vec::new();
    for combo in plan {
        let id = &combo.executor.info().id;
        match per_executor.iter_mut().find(|(e, _)| e == id) {
            Some((_, count)) => *count += 1,
            None => per_executor.push((id.clone(), 1)),
        }
    }
    let _ = writeln!(out, "\n{} combinations", plan.len());
    for (id, count) in per_executor {
        let _ = writeln!(out, "  {id}: {count}");
    }
    out
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<28} {:>5} {:>6} {:>7} {:>6} {:>6} {:>10} {:>9}",
        "EXECUTOR", "RUNS", "PASSED", "RATE", "SCORE", "ERRORS", "COST", "P50 MS"
    );
    for (id, s) in &summary.executors {
        let _ = writeln!(
            out,
            "{:<28} {:>5} {:>6} {:>6.1}% {:>6.2} {:>6} {:>10} {:>9}",
            format!("{} ({id})", s.display_name),
            s.results,
            s.passed,
            s.pass_rate * 100.0,
            s.mean_score,
            s.infrastructure_failures,
            format!("${:.4}", s.total_cost_usd),
            s.median_latency_ms
        );
    }
    let _ = writeln!(
        out,
        "\n{} results, {} passed, {} errors, total cost ${:.4}",
        summary.total, summary.passed, summary.errors, summary.total_cost_usd
    );
    out
}
