//! Run-wide aggregation of verdicts.

use serde::{Deserialize, Serialize};

use crate::outcome::{MutantResult, Verdict};

/// Running totals and per-verdict listings for a run.
///
/// Counters only change through [`Collector::collect`] and
/// [`Collector::collect_shadow`], so
/// `total == kills + escapes + errors + timeouts + shadows` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collector {
    total: usize,
    kills: usize,
    escapes: usize,
    errors: usize,
    timeouts: usize,
    shadows: usize,
    escaped: Vec<MutantResult>,
    timed_out: Vec<MutantResult>,
    errored: Vec<MutantResult>,
}

impl Collector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one classified mutant.
    pub fn collect(&mut self, result: &MutantResult) {
        match result.verdict {
            Verdict::Kill => self.kills += 1,
            Verdict::Escape => {
                self.escapes += 1;
                self.escaped.push(result.clone());
            }
            Verdict::Error => {
                self.errors += 1;
                self.errored.push(result.clone());
            }
            Verdict::Timeout => {
                self.timeouts += 1;
                self.timed_out.push(result.clone());
            }
            Verdict::Shadow => {
                self.collect_shadow();
                return;
            }
        }
        self.total += 1;
        debug_assert!(self.is_consistent());
    }

    /// Record one mutant no test covers.
    pub fn collect_shadow(&mut self) {
        self.shadows += 1;
        self.total += 1;
        debug_assert!(self.is_consistent());
    }

    fn is_consistent(&self) -> bool {
        self.total == self.kills + self.escapes + self.errors + self.timeouts + self.shadows
    }

    /// All mutants seen.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Killed mutants.
    pub fn kills(&self) -> usize {
        self.kills
    }

    /// Escaped mutants.
    pub fn escapes(&self) -> usize {
        self.escapes
    }

    /// Errored mutants.
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Timed-out mutants.
    pub fn timeouts(&self) -> usize {
        self.timeouts
    }

    /// Mutants without covering tests.
    pub fn shadows(&self) -> usize {
        self.shadows
    }

    /// Mutants that had covering tests.
    pub fn measurable_total(&self) -> usize {
        self.total - self.shadows
    }

    /// Escaped mutants in collection order.
    pub fn escaped(&self) -> &[MutantResult] {
        &self.escaped
    }

    /// Timed-out mutants in collection order.
    pub fn timed_out(&self) -> &[MutantResult] {
        &self.timed_out
    }

    /// Errored mutants in collection order.
    pub fn errored(&self) -> &[MutantResult] {
        &self.errored
    }

    /// `kills / (total - shadows)`, 0 when nothing was measurable.
    pub fn covered_detection_rate(&self) -> f64 {
        ratio(self.kills, self.measurable_total())
    }

    /// `kills / total`, 0 for an empty run.
    pub fn combined_detection_rate(&self) -> f64 {
        ratio(self.kills, self.total)
    }

    /// `1 - shadows / total`, 0 for an empty run.
    pub fn mutation_coverage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        1.0 - ratio(self.shadows, self.total)
    }

    /// Summary record for reporting.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total,
            kills: self.kills,
            escapes: self.escapes,
            errors: self.errors,
            timeouts: self.timeouts,
            notests: self.shadows,
            covered_score: percent(self.covered_detection_rate()),
            combined_score: percent(self.combined_detection_rate()),
            mutation_coverage: percent(self.mutation_coverage()),
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn percent(rate: f64) -> u32 {
    (rate * 100.0).round().clamp(0.0, 100.0) as u32
}

/// Aggregated run counts and scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// All mutants seen.
    pub total: usize,
    /// Killed mutants.
    pub kills: usize,
    /// Escaped mutants.
    pub escapes: usize,
    /// Errored mutants.
    pub errors: usize,
    /// Timed-out mutants.
    pub timeouts: usize,
    /// Mutants without covering tests.
    pub notests: usize,
    /// Covered detection rate, percent.
    pub covered_score: u32,
    /// Combined detection rate, percent.
    pub combined_score: u32,
    /// Mutation coverage, percent.
    pub mutation_coverage: u32,
}
