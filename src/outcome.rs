//! Mutant verdicts and the classification table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mutant::{Mutation, TestId};
use crate::process::ProcessStatus;

/// Verdict for one mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Covering tests failed.
    Kill,
    /// Covering tests passed despite the mutation.
    Escape,
    /// The process crashed or wrote to its error stream.
    Error,
    /// The process exceeded its time budget.
    Timeout,
    /// No test covers the mutated location.
    Shadow,
}

impl Verdict {
    /// Lowercase name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kill => "kill",
            Self::Escape => "escape",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Shadow => "shadow",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a finished process to a verdict.
///
/// Priority: timeout, then error, then adapter-reported failure (kill);
/// anything else escaped.
pub fn classify(timed_out: bool, status: ProcessStatus) -> Verdict {
    if timed_out {
        return Verdict::Timeout;
    }
    match status {
        ProcessStatus::TimedOut => Verdict::Timeout,
        ProcessStatus::Errored => Verdict::Error,
        ProcessStatus::Failed => Verdict::Kill,
        ProcessStatus::Nominal => Verdict::Escape,
    }
}

/// Classified outcome of one executed mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantResult {
    /// The mutation that was tested.
    pub mutation: Mutation,
    /// Final verdict.
    pub verdict: Verdict,
    /// Tests that were run against the mutant.
    pub tests: Vec<TestId>,
    /// Captured stdout.
    pub output: String,
    /// Captured stderr.
    pub error_output: String,
    /// Process exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// Runtime in milliseconds.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_wins_over_everything() {
        for status in [
            ProcessStatus::Nominal,
            ProcessStatus::Failed,
            ProcessStatus::Errored,
            ProcessStatus::TimedOut,
        ] {
            assert_eq!(classify(true, status), Verdict::Timeout);
        }
        assert_eq!(classify(false, ProcessStatus::TimedOut), Verdict::Timeout);
    }

    #[test]
    fn decision_table_in_priority_order() {
        assert_eq!(classify(false, ProcessStatus::Errored), Verdict::Error);
        assert_eq!(classify(false, ProcessStatus::Failed), Verdict::Kill);
        assert_eq!(classify(false, ProcessStatus::Nominal), Verdict::Escape);
    }

    #[test]
    fn verdict_serializes_snake_case() {
        let json = serde_json::to_string(&Verdict::Timeout).expect("verdict should serialize");
        assert_eq!(json, "\"timeout\"");
        assert_eq!(Verdict::Shadow.to_string(), "shadow");
    }
}
