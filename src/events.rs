//! Append-only JSONL event log and its replay.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collector::{Collector, RunSummary};
use crate::mutant::{Mutation, TestId};
use crate::observer::{RunObserver, RunStart, UnitProgress};
use crate::outcome::{MutantResult, Verdict};
use crate::timer::RunTimer;

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Mutation phase started.
    RunStarted {
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Number of mutable units.
        unit_count: usize,
        /// Effective batch size.
        parallelism: usize,
        /// Per-mutant timeout in milliseconds.
        timeout_ms: u64,
    },
    /// Mutant without covering tests.
    ShadowMutant {
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Zero-based unit index.
        unit_index: usize,
        /// Mutants handled so far.
        progress: usize,
    },
    /// Mutant executed and classified.
    MutantDone {
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Zero-based unit index.
        unit_index: usize,
        /// Mutants handled so far.
        progress: usize,
        /// The mutation.
        mutation: Mutation,
        /// Final verdict.
        verdict: Verdict,
        /// Covering tests that were run.
        #[serde(default)]
        tests: Vec<TestId>,
        /// Process exit code.
        #[serde(default)]
        exit_code: Option<i32>,
        /// Runtime in milliseconds.
        #[serde(default)]
        duration_ms: u64,
    },
    /// Mutation phase ended.
    RunEnded {
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Final tallies.
        summary: RunSummary,
        /// Run duration in milliseconds.
        elapsed_ms: u64,
    },
}

/// Event log errors.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Current unix timestamp in milliseconds.
pub fn now_timestamp_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Append one event as a JSONL line.
pub fn append_event(path: &Path, event: &RunEvent) -> Result<(), EventLogError> {
    let json = serde_json::to_string(event)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

/// State reconstructed from an event log. Only the most recent run counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLogSnapshot {
    /// Number of `run_started` records seen.
    pub runs: usize,
    /// Whether the latest run reached `run_ended`.
    pub completed: bool,
    /// Lines that failed to parse and were skipped.
    pub malformed_lines: usize,
    /// Tallies rebuilt from the latest run's mutant records.
    pub collector: Collector,
    /// Summary recorded by the latest `run_ended`, if any.
    pub recorded_summary: Option<RunSummary>,
    /// Duration recorded by the latest `run_ended`, if any.
    pub elapsed_ms: Option<u64>,
}

/// Replay an event log, skipping (and counting) malformed lines.
pub fn read_event_log(path: &Path) -> Result<EventLogSnapshot, EventLogError> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut snapshot = EventLogSnapshot::default();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<RunEvent>(&line) else {
            snapshot.malformed_lines += 1;
            continue;
        };

        match event {
            RunEvent::RunStarted { .. } => {
                snapshot.runs += 1;
                snapshot.completed = false;
                snapshot.collector = Collector::new();
                snapshot.recorded_summary = None;
                snapshot.elapsed_ms = None;
            }
            RunEvent::ShadowMutant { .. } => snapshot.collector.collect_shadow(),
            RunEvent::MutantDone {
                mutation,
                verdict,
                tests,
                exit_code,
                duration_ms,
                ..
            } => snapshot.collector.collect(&MutantResult {
                mutation,
                verdict,
                tests,
                output: String::new(),
                error_output: String::new(),
                exit_code,
                duration_ms,
            }),
            RunEvent::RunEnded {
                summary,
                elapsed_ms,
                ..
            } => {
                snapshot.completed = true;
                snapshot.recorded_summary = Some(summary);
                snapshot.elapsed_ms = Some(elapsed_ms);
            }
        }
    }

    Ok(snapshot)
}

/// Observer appending every notification to a JSONL file.
///
/// Write failures are logged and counted; they never abort the run.
#[derive(Debug)]
pub struct EventLogObserver {
    path: PathBuf,
    failures: usize,
}

impl EventLogObserver {
    /// Observer appending to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            failures: 0,
        }
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events that could not be written.
    pub fn failures(&self) -> usize {
        self.failures
    }

    fn record(&mut self, event: RunEvent) {
        if let Err(err) = append_event(&self.path, &event) {
            self.failures += 1;
            tracing::warn!(path = %self.path.display(), error = %err, "failed to append run event");
        }
    }
}

impl RunObserver for EventLogObserver {
    fn on_start_run(&mut self, start: &RunStart) {
        self.record(RunEvent::RunStarted {
            timestamp_ms: now_timestamp_ms(),
            unit_count: start.unit_count,
            parallelism: start.parallelism,
            timeout_ms: start.timeout_ms,
        });
    }

    fn on_shadow_mutant(&mut self, progress: UnitProgress) {
        self.record(RunEvent::ShadowMutant {
            timestamp_ms: now_timestamp_ms(),
            unit_index: progress.unit_index,
            progress: progress.progress,
        });
    }

    fn on_mutant_done(&mut self, result: &MutantResult, progress: UnitProgress) {
        self.record(RunEvent::MutantDone {
            timestamp_ms: now_timestamp_ms(),
            unit_index: progress.unit_index,
            progress: progress.progress,
            mutation: result.mutation.clone(),
            verdict: result.verdict,
            tests: result.tests.clone(),
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
        });
    }

    fn on_end_run(&mut self, collector: &Collector, timer: &RunTimer) {
        self.record(RunEvent::RunEnded {
            timestamp_ms: now_timestamp_ms(),
            summary: collector.summary(),
            elapsed_ms: u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
    }
}
