//! Run observers.
//!
//! Observers are notified synchronously on the orchestrator thread, in
//! registration order, after the collector has been updated.

use std::io::Write;

use crate::collector::Collector;
use crate::outcome::{MutantResult, Verdict};
use crate::timer::RunTimer;

/// Marks written per line by [`ProgressObserver`].
pub const PROGRESS_LINE_WIDTH: usize = 60;

/// Facts known when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStart {
    /// Number of mutable units.
    pub unit_count: usize,
    /// Effective batch size.
    pub parallelism: usize,
    /// Per-mutant timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Position of a notification within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitProgress {
    /// Zero-based index of the current unit.
    pub unit_index: usize,
    /// Number of units in the run.
    pub unit_count: usize,
    /// Mutants handled so far, including this one.
    pub progress: usize,
}

/// Receives run notifications. Every method defaults to a no-op.
pub trait RunObserver {
    /// The mutation phase is starting.
    fn on_start_run(&mut self, _start: &RunStart) {}

    /// A mutant had no covering tests.
    fn on_shadow_mutant(&mut self, _progress: UnitProgress) {}

    /// A mutant was executed and classified.
    fn on_mutant_done(&mut self, _result: &MutantResult, _progress: UnitProgress) {}

    /// The mutation phase ended, normally or by cancellation.
    fn on_end_run(&mut self, _collector: &Collector, _timer: &RunTimer) {}
}

/// Ordered set of observers, itself an observer.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn RunObserver>>,
}

impl ObserverList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer after the existing ones.
    pub fn push(&mut self, observer: Box<dyn RunObserver>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl RunObserver for ObserverList {
    fn on_start_run(&mut self, start: &RunStart) {
        for observer in &mut self.observers {
            observer.on_start_run(start);
        }
    }

    fn on_shadow_mutant(&mut self, progress: UnitProgress) {
        for observer in &mut self.observers {
            observer.on_shadow_mutant(progress);
        }
    }

    fn on_mutant_done(&mut self, result: &MutantResult, progress: UnitProgress) {
        for observer in &mut self.observers {
            observer.on_mutant_done(result, progress);
        }
    }

    fn on_end_run(&mut self, collector: &Collector, timer: &RunTimer) {
        for observer in &mut self.observers {
            observer.on_end_run(collector, timer);
        }
    }
}

/// Emits structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_start_run(&mut self, start: &RunStart) {
        tracing::info!(
            units = start.unit_count,
            parallelism = start.parallelism,
            timeout_ms = start.timeout_ms,
            "mutation testing started"
        );
    }

    fn on_shadow_mutant(&mut self, progress: UnitProgress) {
        tracing::debug!(
            unit = progress.unit_index + 1,
            units = progress.unit_count,
            progress = progress.progress,
            "mutant has no covering tests"
        );
    }

    fn on_mutant_done(&mut self, result: &MutantResult, progress: UnitProgress) {
        tracing::debug!(
            mutant = %result.mutation.label(),
            verdict = %result.verdict,
            duration_ms = result.duration_ms,
            tests = result.tests.len(),
            progress = progress.progress,
            "mutant classified"
        );
    }

    fn on_end_run(&mut self, collector: &Collector, timer: &RunTimer) {
        let summary = collector.summary();
        tracing::info!(
            total = summary.total,
            kills = summary.kills,
            escapes = summary.escapes,
            errors = summary.errors,
            timeouts = summary.timeouts,
            notests = summary.notests,
            covered_score = summary.covered_score,
            elapsed = %timer.time_string(),
            "mutation testing finished"
        );
    }
}

/// Writes one progress mark per mutant: `.` kill, `M` escape, `E` error,
/// `T` timeout, `S` shadow. Lines wrap every [`PROGRESS_LINE_WIDTH`] marks
/// with the running count.
#[derive(Debug)]
pub struct ProgressObserver<W: Write> {
    out: W,
    column: usize,
}

impl<W: Write> ProgressObserver<W> {
    /// Progress writer over `out`.
    pub fn new(out: W) -> Self {
        Self { out, column: 0 }
    }

    /// Release the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn mark(&mut self, mark: char, progress: UnitProgress) {
        let mut line = mark.to_string();
        self.column += 1;
        if self.column == PROGRESS_LINE_WIDTH {
            line.push_str(&format!(
                " | {:>5} ({}/{})\n",
                progress.progress,
                progress.unit_index + 1,
                progress.unit_count
            ));
            self.column = 0;
        }
        self.write(line.as_bytes());
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Err(err) = self.out.write_all(bytes).and_then(|()| self.out.flush()) {
            tracing::debug!(error = %err, "failed to write progress");
        }
    }
}

/// Progress mark for a verdict.
pub fn progress_mark(verdict: Verdict) -> char {
    match verdict {
        Verdict::Kill => '.',
        Verdict::Escape => 'M',
        Verdict::Error => 'E',
        Verdict::Timeout => 'T',
        Verdict::Shadow => 'S',
    }
}

impl<W: Write> RunObserver for ProgressObserver<W> {
    fn on_shadow_mutant(&mut self, progress: UnitProgress) {
        self.mark(progress_mark(Verdict::Shadow), progress);
    }

    fn on_mutant_done(&mut self, result: &MutantResult, progress: UnitProgress) {
        self.mark(progress_mark(result.verdict), progress);
    }

    fn on_end_run(&mut self, collector: &Collector, timer: &RunTimer) {
        let mut tail = String::new();
        if self.column > 0 {
            tail.push('\n');
            self.column = 0;
        }
        let summary = collector.summary();
        tail.push_str(&format!(
            "{} mutations: {} killed, {} escaped, {} errors, {} timeouts, {} without tests ({})\n",
            summary.total,
            summary.kills,
            summary.escapes,
            summary.errors,
            summary.timeouts,
            summary.notests,
            timer.time_string()
        ));
        self.write(tail.as_bytes());
    }
}
