use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mutation_harness::adapter::TapCommandAdapter;
use mutation_harness::collector::RunSummary;
use mutation_harness::config::{DEFAULT_TIMEOUT_MS, RunConfig};
use mutation_harness::events::read_event_log;
use mutation_harness::observer::{ProgressObserver, TracingObserver};
use mutation_harness::orchestrator::{Orchestrator, RunError};
use mutation_harness::source::CatalogSource;

#[derive(Debug, Parser)]
#[command(name = "mutation-harness")]
#[command(about = "Coverage-guided mutation testing for any TAP-speaking test command")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the baseline, then every catalogued mutation against its covering tests.
    Run {
        /// JSON array of mutation descriptors.
        #[arg(long)]
        mutations: PathBuf,
        /// Test command; receives the mutation through MUTATION_HARNESS_* variables.
        #[arg(long)]
        test_cmd: String,
        /// Project directory the test command runs in.
        #[arg(long)]
        project: Option<PathBuf>,
        /// Where the baseline writes coverage. A scratch directory is used otherwise.
        #[arg(long)]
        coverage: Option<PathBuf>,
        /// Mutants run concurrently per batch.
        #[arg(long, default_value_t = 1)]
        parallel: usize,
        /// Per-mutant timeout in seconds.
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS / 1000)]
        timeout: u64,
        /// Baseline timeout in seconds.
        #[arg(long)]
        baseline_timeout: Option<u64>,
        /// Write a JSON report here.
        #[arg(long)]
        log_json: Option<PathBuf>,
        /// Write a text report here.
        #[arg(long)]
        log_text: Option<PathBuf>,
        /// Append run events to this JSONL file.
        #[arg(long)]
        event_log: Option<PathBuf>,
        /// Suppress progress marks.
        #[arg(long)]
        quiet: bool,
    },
    /// Summarize a run from its event log.
    Status {
        /// JSONL event log written by `run --event-log`.
        #[arg(long)]
        event_log: PathBuf,
        /// Emit JSON output.
        #[arg(long)]
        json: bool,
    },
}

fn print_summary(summary: &RunSummary) {
    println!(
        "summary: total={}, kills={}, escapes={}, errors={}, timeouts={}, notests={}",
        summary.total,
        summary.kills,
        summary.escapes,
        summary.errors,
        summary.timeouts,
        summary.notests
    );
    println!(
        "scores: covered={}%, combined={}%, mutation_coverage={}%",
        summary.covered_score, summary.combined_score, summary.mutation_coverage
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mutation_harness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            mutations,
            test_cmd,
            project,
            coverage,
            parallel,
            timeout,
            baseline_timeout,
            log_json,
            log_text,
            event_log,
            quiet,
        } => {
            let mut config = RunConfig::default()
                .with_parallelism(parallel)
                .with_timeout_secs(timeout);
            if let Some(project) = project {
                config = config.with_project_dir(project);
            }
            if let Some(coverage) = coverage {
                config = config.with_coverage_path(coverage);
            }
            if let Some(secs) = baseline_timeout {
                config = config.with_baseline_timeout_ms(secs.saturating_mul(1000));
            }
            if let Some(path) = log_json {
                config = config.with_log_json(path);
            }
            if let Some(path) = log_text {
                config = config.with_log_text(path);
            }
            if let Some(path) = event_log {
                config = config.with_event_log(path);
            }

            let adapter = TapCommandAdapter::from_command_line(&test_cmd)?;
            let mut source = CatalogSource::load(&mutations)?;

            let cancel = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&cancel);
            ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
                .context("failed to install Ctrl-C handler")?;

            let mut orchestrator =
                Orchestrator::new(config, source.units()).with_cancel_flag(cancel);
            orchestrator.add_observer(Box::new(TracingObserver));
            if !quiet {
                orchestrator.add_observer(Box::new(ProgressObserver::new(std::io::stdout())));
            }

            match orchestrator.execute(&adapter, &mut source) {
                Ok(report) => {
                    print_summary(&report.summary);
                    println!("interrupted: {}", report.interrupted);
                    println!("time: {}", orchestrator.timer().time_string());
                }
                Err(RunError::BaselineFailed(failure)) => {
                    if !failure.output.is_empty() {
                        eprintln!("--- baseline stdout ---\n{}", failure.output.trim_end());
                    }
                    if !failure.error_output.is_empty() {
                        eprintln!(
                            "--- baseline stderr ---\n{}",
                            failure.error_output.trim_end()
                        );
                    }
                    anyhow::bail!(
                        "baseline test run failed: {failure}; mutation testing requires a passing suite"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Status { event_log, json } => {
            let snapshot = read_event_log(&event_log)
                .with_context(|| format!("failed to read event log {}", event_log.display()))?;
            let summary = snapshot.collector.summary();
            if json {
                let output = serde_json::json!({
                    "runs": snapshot.runs,
                    "completed": snapshot.completed,
                    "malformed_lines": snapshot.malformed_lines,
                    "elapsed_ms": snapshot.elapsed_ms,
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("runs: {}", snapshot.runs);
                println!("completed: {}", snapshot.completed);
                println!("malformed lines: {}", snapshot.malformed_lines);
                print_summary(&summary);
            }
        }
    }

    Ok(())
}
