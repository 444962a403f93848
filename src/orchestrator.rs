//! Baseline run followed by the per-unit, per-batch mutation loop.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::adapter::{Invocation, TestAdapter, build_process};
use crate::collector::{Collector, RunSummary};
use crate::config::{ConfigError, RunConfig};
use crate::coverage::{
    COVERAGE_FILE_NAME, CoverageError, CoverageIndex, CoverageLookup, FileCoverage, LineCoverage,
};
use crate::events::EventLogObserver;
use crate::group::{GroupError, ParallelGroup};
use crate::mutant::{InvariantViolation, MutableUnit, Mutant, Mutation};
use crate::observer::{ObserverList, RunObserver, RunStart, UnitProgress};
use crate::process::{ProcessHandle, ProcessStatus};
use crate::report::{ReportFormat, write_report};
use crate::source::{MutationSource, SourceError};
use crate::timer::RunTimer;

/// Why the un-mutated test suite was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineFailure {
    /// Final process status.
    pub status: ProcessStatus,
    /// Whether the baseline hit its timeout.
    pub timed_out: bool,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub output: String,
    /// Captured stderr.
    pub error_output: String,
}

impl BaselineFailure {
    /// Short reason for logs and error messages.
    pub fn reason(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        match (self.status, self.exit_code) {
            (ProcessStatus::Errored, Some(code)) if code != 0 && self.error_output.is_empty() => {
                format!("exited with code {code}")
            }
            (ProcessStatus::Errored, _) => {
                "wrote to its error stream or terminated abnormally".to_string()
            }
            (ProcessStatus::Failed, _) => "reported failing tests".to_string(),
            (_, Some(code)) => format!("exited with code {code}"),
            (_, None) => "was terminated by a signal".to_string(),
        }
    }
}

impl fmt::Display for BaselineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the test suite {}", self.reason())
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The baseline run did not pass.
    #[error("baseline test run failed: {0}")]
    BaselineFailed(Box<BaselineFailure>),
    /// The coverage artifact could not be loaded.
    #[error(transparent)]
    Coverage(#[from] CoverageError),
    /// The mutation source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// An engine invariant was broken.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
    /// A batch could not be formed.
    #[error(transparent)]
    Group(#[from] GroupError),
    /// IO failure outside of test processes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a completed or cancelled mutation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    /// Final tallies.
    pub summary: RunSummary,
    /// True if the run stopped early on the cancel flag.
    pub interrupted: bool,
    /// Duration of the mutation phase.
    pub elapsed: Duration,
}

/// Drives a mutation run.
///
/// Batches run one after another; processes within a batch run side by
/// side. The collector and observers are only touched on the calling
/// thread, between batches.
pub struct Orchestrator {
    config: RunConfig,
    units: Vec<MutableUnit>,
    observers: ObserverList,
    collector: Collector,
    timer: RunTimer,
    cancel: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("units", &self.units)
            .field("observers", &self.observers)
            .field("collector", &self.collector)
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator over `units`, sorted and de-duplicated by path.
    ///
    /// When `config.event_log` is set an [`EventLogObserver`] is registered
    /// first.
    pub fn new(config: RunConfig, units: impl IntoIterator<Item = MutableUnit>) -> Self {
        let mut units: Vec<MutableUnit> = units.into_iter().collect();
        units.sort();
        units.dedup();

        let mut observers = ObserverList::new();
        if let Some(path) = &config.event_log {
            observers.push(Box::new(EventLogObserver::new(path)));
        }

        Self {
            config,
            units,
            observers,
            collector: Collector::new(),
            timer: RunTimer::new(),
            cancel: None,
        }
    }

    /// Register an observer after the existing ones.
    pub fn add_observer(&mut self, observer: Box<dyn RunObserver>) {
        self.observers.push(observer);
    }

    /// Stop before the next batch once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Units in run order.
    pub fn units(&self) -> &[MutableUnit] {
        &self.units
    }

    /// Tallies so far.
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Mutation phase timer.
    pub fn timer(&self) -> &RunTimer {
        &self.timer
    }

    /// Baseline, coverage, then the mutation loop.
    pub fn execute(
        &mut self,
        adapter: &dyn TestAdapter,
        source: &mut dyn MutationSource,
    ) -> Result<RunReport, RunError> {
        self.config.validate()?;

        let (coverage_path, scratch) = match &self.config.coverage_path {
            Some(path) => (path.clone(), None),
            None => {
                let scratch = tempfile::Builder::new()
                    .prefix("mutation-harness-")
                    .tempdir()?;
                (scratch.path().join(COVERAGE_FILE_NAME), Some(scratch))
            }
        };

        self.run_baseline(adapter, &coverage_path)?;

        let mut coverage = CoverageIndex::load(&coverage_path)?;
        if let Some(scratch) = scratch {
            coverage = coverage.with_scratch_dir(scratch);
        }
        tracing::info!(files = coverage.file_count(), "coverage loaded");

        self.run(adapter, source, coverage)
    }

    /// Run the un-mutated suite once; it must pass for mutants to mean
    /// anything.
    pub fn run_baseline(
        &self,
        adapter: &dyn TestAdapter,
        coverage_path: &Path,
    ) -> Result<(), RunError> {
        tracing::info!(coverage = %coverage_path.display(), "running baseline test suite");

        let mut handle = build_process(
            adapter,
            &self.config,
            "baseline",
            Invocation::Baseline { coverage_path },
        );
        let outcome = ParallelGroup::new(
            BTreeMap::from([(0, &mut handle)]),
            adapter,
            self.config.poll_interval(),
        )?
        .run();

        let timed_out = outcome.timed_out(0) || handle.timed_out();
        let passed = !timed_out
            && handle.status() == ProcessStatus::Nominal
            && handle.exit_code() == Some(0);
        if passed {
            tracing::info!(
                elapsed_ms = u64::try_from(handle.elapsed().as_millis()).unwrap_or(u64::MAX),
                "baseline passed"
            );
            return Ok(());
        }

        let (output, error_output) = handle.take_output();
        let failure = BaselineFailure {
            status: handle.status(),
            timed_out,
            exit_code: handle.exit_code(),
            output,
            error_output,
        };
        tracing::error!(reason = %failure.reason(), "baseline failed");
        Err(RunError::BaselineFailed(Box::new(failure)))
    }

    /// Mutation loop over an already loaded coverage index.
    ///
    /// Each call starts from an empty collector. The index is cleaned up
    /// whether or not the loop succeeds.
    pub fn run(
        &mut self,
        adapter: &dyn TestAdapter,
        source: &mut dyn MutationSource,
        mut coverage: CoverageIndex,
    ) -> Result<RunReport, RunError> {
        self.config.validate()?;
        let looped = self.run_units(adapter, source, &coverage);
        coverage.cleanup();
        self.timer.stop();
        let interrupted = looped?;

        self.observers.on_end_run(&self.collector, &self.timer);
        self.write_logs();

        Ok(RunReport {
            summary: self.collector.summary(),
            interrupted,
            elapsed: self.timer.elapsed(),
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    // Returns whether the loop stopped on the cancel flag.
    fn run_units(
        &mut self,
        adapter: &dyn TestAdapter,
        source: &mut dyn MutationSource,
        coverage: &CoverageIndex,
    ) -> Result<bool, RunError> {
        let unit_count = self.units.len();
        let parallelism = self.config.parallelism();
        self.observers.on_start_run(&RunStart {
            unit_count,
            parallelism,
            timeout_ms: self.config.timeout_ms,
        });
        self.collector = Collector::new();
        self.timer.start();

        let units = self.units.clone();
        let mut progress = 0;
        for (unit_index, unit) in units.iter().enumerate() {
            if self.cancelled() {
                tracing::warn!(unit = %unit.path().display(), "run cancelled");
                return Ok(true);
            }

            let mutations = source.generate(unit)?;
            let mut cursor = Cursor {
                unit_index,
                unit_count,
                progress: &mut progress,
            };

            let file = match coverage.load_coverage_for(unit.path()) {
                CoverageLookup::Covered(file) => file,
                CoverageLookup::Uncovered => {
                    tracing::warn!(
                        unit = %unit.path().display(),
                        mutations = mutations.len(),
                        "no tests cover this unit"
                    );
                    for _ in &mutations {
                        self.shadow(&mut cursor);
                    }
                    source.cleanup(unit);
                    continue;
                }
            };

            for batch in mutations.chunks(parallelism) {
                if self.cancelled() {
                    tracing::warn!(unit = %unit.path().display(), "run cancelled");
                    source.cleanup(unit);
                    return Ok(true);
                }
                self.run_batch(adapter, &file, batch, &mut cursor)?;
            }
            source.cleanup(unit);
        }
        Ok(false)
    }

    fn run_batch(
        &mut self,
        adapter: &dyn TestAdapter,
        file: &FileCoverage,
        batch: &[Mutation],
        cursor: &mut Cursor<'_>,
    ) -> Result<(), RunError> {
        // Keyed by batch position so results map back to their mutation.
        let mut mutants: BTreeMap<usize, Mutant> = BTreeMap::new();
        for (tracker, mutation) in batch.iter().enumerate() {
            match file.tests_for_line(mutation.line) {
                LineCoverage::Covered(tests) => {
                    mutants.insert(tracker, Mutant::new(mutation.clone(), tests));
                }
                LineCoverage::Uncovered => self.shadow(cursor),
            }
        }
        if mutants.is_empty() {
            return Ok(());
        }

        let config = &self.config;
        let members: BTreeMap<usize, &mut ProcessHandle> = mutants
            .iter_mut()
            .map(|(tracker, mutant)| (*tracker, mutant.process(adapter, config)))
            .collect();
        tracing::debug!(
            unit = cursor.unit_index + 1,
            mutants = members.len(),
            "running batch"
        );
        let outcome = ParallelGroup::new(members, adapter, config.poll_interval())?.run();

        for (tracker, mutant) in &mut mutants {
            let result = mutant.take_result(outcome.timed_out(*tracker))?;
            self.collector.collect(&result);
            let progress = cursor.advance();
            self.observers.on_mutant_done(&result, progress);
        }
        Ok(())
    }

    fn shadow(&mut self, cursor: &mut Cursor<'_>) {
        self.collector.collect_shadow();
        let progress = cursor.advance();
        self.observers.on_shadow_mutant(progress);
    }

    fn write_logs(&self) {
        let logs: [(&Option<PathBuf>, ReportFormat); 2] = [
            (&self.config.log_json, ReportFormat::Json),
            (&self.config.log_text, ReportFormat::Text),
        ];
        for (path, format) in logs {
            let Some(path) = path else { continue };
            match write_report(path, &self.collector, &self.timer, format) {
                Ok(()) => tracing::info!(path = %path.display(), "report written"),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to write report");
                }
            }
        }
    }
}

struct Cursor<'a> {
    unit_index: usize,
    unit_count: usize,
    progress: &'a mut usize,
}

impl Cursor<'_> {
    fn advance(&mut self) -> UnitProgress {
        *self.progress += 1;
        UnitProgress {
            unit_index: self.unit_index,
            unit_count: self.unit_count,
            progress: *self.progress,
        }
    }
}
