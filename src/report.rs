//! Run report rendering.

use std::path::Path;

use serde::Serialize;

use crate::collector::{Collector, RunSummary};
use crate::outcome::MutantResult;
use crate::timer::RunTimer;

/// Captured output kept per mutant in reports.
pub const PREVIEW_LIMIT: usize = 2000;

/// Supported output formats for run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// JSON summary plus the escaped, timed-out and errored mutants.
    Json,
    /// Plain text, one section per listing.
    Text,
    /// Markdown summary table.
    Markdown,
}

/// Per-mutant report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutantReport {
    /// Source file path.
    pub file: String,
    /// Source line number.
    pub line: u32,
    /// Mutation operator.
    pub operator: String,
    /// Original code snippet.
    pub original: String,
    /// Mutated code snippet.
    pub mutated: String,
    /// Tests run against the mutant.
    pub tests: Vec<String>,
    /// Process exit code.
    pub exit_code: Option<i32>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Stdout preview.
    pub stdout_preview: String,
    /// Stderr preview.
    pub stderr_preview: String,
}

impl From<&MutantResult> for MutantReport {
    fn from(result: &MutantResult) -> Self {
        Self {
            file: result.mutation.file.display().to_string(),
            line: result.mutation.line,
            operator: result.mutation.operator.clone(),
            original: result.mutation.original.clone(),
            mutated: result.mutation.mutated.clone(),
            tests: result.tests.clone(),
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            stdout_preview: truncate_preview(&result.output),
            stderr_preview: truncate_preview(&result.error_output),
        }
    }
}

/// Keep at most [`PREVIEW_LIMIT`] characters, cut on a char boundary.
pub fn truncate_preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    summary: RunSummary,
    escaped: Vec<MutantReport>,
    timeouts: Vec<MutantReport>,
    errors: Vec<MutantReport>,
    elapsed: &'a str,
}

fn listing(results: &[MutantResult]) -> Vec<MutantReport> {
    results.iter().map(MutantReport::from).collect()
}

/// Render the collector in `format`.
pub fn render_report(collector: &Collector, timer: &RunTimer, format: ReportFormat) -> String {
    let summary = collector.summary();
    let elapsed = timer.time_string();

    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&JsonReport {
            summary,
            escaped: listing(collector.escaped()),
            timeouts: listing(collector.timed_out()),
            errors: listing(collector.errored()),
            elapsed: &elapsed,
        })
        .expect("report JSON should serialize"),
        ReportFormat::Text => {
            let mut out = String::from("Mutation testing summary\n========================\n\n");
            out.push_str(&format!(
                "{} mutations were generated:\n\
                 {:>8} mutants were killed\n\
                 {:>8} mutants were not covered by tests\n\
                 {:>8} covered mutants were not detected\n\
                 {:>8} fatal errors were encountered\n\
                 {:>8} time outs were encountered\n\n",
                summary.total,
                summary.kills,
                summary.notests,
                summary.escapes,
                summary.errors,
                summary.timeouts
            ));
            out.push_str(&format!(
                "Metrics:\n    Mutation Score Indicator (MSI): {}%\n    \
                 Mutation Code Coverage: {}%\n    Covered Code MSI: {}%\n\n",
                summary.combined_score, summary.mutation_coverage, summary.covered_score
            ));

            out.push_str(&text_section("Escapes", collector.escaped()));
            if !collector.timed_out().is_empty() {
                out.push('\n');
                out.push_str(&text_section("Timeouts", collector.timed_out()));
            }
            if !collector.errored().is_empty() {
                out.push('\n');
                out.push_str(&text_section("Errors", collector.errored()));
            }
            out.push_str(&format!("\nTime: {elapsed}\n"));
            out
        }
        ReportFormat::Markdown => {
            let mut out = String::from("# Mutation Run\n\n");
            out.push_str("## Summary\n\n| metric | count |\n|---|---:|\n");
            out.push_str(&format!("| total | {} |\n", summary.total));
            out.push_str(&format!("| killed | {} |\n", summary.kills));
            out.push_str(&format!("| escaped | {} |\n", summary.escapes));
            out.push_str(&format!("| errors | {} |\n", summary.errors));
            out.push_str(&format!("| timeouts | {} |\n", summary.timeouts));
            out.push_str(&format!("| no tests | {} |\n", summary.notests));
            out.push_str(&format!("| covered score | {}% |\n", summary.covered_score));
            out.push_str(&format!("| combined score | {}% |\n", summary.combined_score));
            out.push_str(&format!(
                "| mutation coverage | {}% |\n",
                summary.mutation_coverage
            ));
            out.push_str(&format!("\nelapsed: {elapsed}\n"));

            for (title, results) in [
                ("Escaped", collector.escaped()),
                ("Timeouts", collector.timed_out()),
                ("Errors", collector.errored()),
            ] {
                if results.is_empty() {
                    continue;
                }
                out.push_str(&format!(
                    "\n## {title}\n\n| mutant | original | mutated |\n|---|---|---|\n"
                ));
                for result in results {
                    out.push_str(&format!(
                        "| {} | `{}` | `{}` |\n",
                        result.mutation.label(),
                        result.mutation.original,
                        result.mutation.mutated
                    ));
                }
            }
            out
        }
    }
}

fn text_section(title: &str, results: &[MutantResult]) -> String {
    let mut out = format!("------\n{title}\n------\n");
    for (n, result) in results.iter().enumerate() {
        out.push_str(&format!(
            "{}) {}\n  - {}\n  + {}\n",
            n + 1,
            result.mutation.label(),
            result.mutation.original,
            result.mutation.mutated
        ));
        let stderr = result.error_output.trim_end();
        if !stderr.is_empty() {
            out.push_str(&format!("  stderr: {}\n", truncate_preview(stderr)));
        }
        out.push('\n');
    }
    out
}

/// Render and write a report, replacing any previous file at `path`.
pub fn write_report(
    path: &Path,
    collector: &Collector,
    timer: &RunTimer,
    format: ReportFormat,
) -> std::io::Result<()> {
    std::fs::write(path, render_report(collector, timer, format))
}
