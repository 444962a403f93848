//! Mutation descriptors and their execution binding.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{Invocation, TestAdapter, build_process};
use crate::config::RunConfig;
use crate::outcome::{MutantResult, classify};
use crate::process::ProcessHandle;

/// Identifier of one test, as understood by the adapter.
pub type TestId = String;

/// A single source location alteration. Opaque to the engine apart from
/// its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Mutated source file.
    pub file: PathBuf,
    /// 1-based line of the mutation.
    pub line: u32,
    /// Operator that produced the mutation.
    pub operator: String,
    /// Original snippet.
    pub original: String,
    /// Replacement snippet.
    pub mutated: String,
}

impl Mutation {
    /// Create a mutation descriptor.
    pub fn new(
        file: impl Into<PathBuf>,
        line: u32,
        operator: impl Into<String>,
        original: impl Into<String>,
        mutated: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            operator: operator.into(),
            original: original.into(),
            mutated: mutated.into(),
        }
    }

    /// `file:line: operator`
    pub fn label(&self) -> String {
        format!("{}:{}: {}", self.file.display(), self.line, self.operator)
    }
}

/// One mutable source file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutableUnit {
    /// Source file path.
    pub path: PathBuf,
}

impl MutableUnit {
    /// Unit for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Broken engine invariants. These abort the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A mutant's result was read a second time.
    #[error("result for mutant `{mutant}` has already been processed")]
    ResultAlreadyRead {
        /// Mutant label.
        mutant: String,
    },
    /// A result was requested before any process existed.
    #[error("mutant `{mutant}` was never executed")]
    NeverExecuted {
        /// Mutant label.
        mutant: String,
    },
}

/// A mutation bound to the tests that cover it and to its test process.
#[derive(Debug)]
pub struct Mutant {
    mutation: Mutation,
    tests: Vec<TestId>,
    process: Option<ProcessHandle>,
    result_read: bool,
}

impl Mutant {
    /// Bind `mutation` to its covering tests.
    pub fn new(mutation: Mutation, tests: Vec<TestId>) -> Self {
        Self {
            mutation,
            tests,
            process: None,
            result_read: false,
        }
    }

    /// The mutation under test.
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Tests covering the mutated line.
    pub fn tests(&self) -> &[TestId] {
        &self.tests
    }

    /// The mutant's process, built through the adapter on first access.
    pub fn process(&mut self, adapter: &dyn TestAdapter, config: &RunConfig) -> &mut ProcessHandle {
        let Self {
            mutation,
            tests,
            process,
            ..
        } = self;
        process.get_or_insert_with(|| {
            build_process(
                adapter,
                config,
                &mutation.label(),
                Invocation::Mutant {
                    mutation,
                    tests: tests.as_slice(),
                },
            )
        })
    }

    /// True once a process has been built.
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Classify the finished process. Allowed exactly once.
    pub fn take_result(&mut self, timed_out: bool) -> Result<MutantResult, InvariantViolation> {
        if self.result_read {
            return Err(InvariantViolation::ResultAlreadyRead {
                mutant: self.mutation.label(),
            });
        }
        let Some(process) = self.process.as_mut() else {
            return Err(InvariantViolation::NeverExecuted {
                mutant: self.mutation.label(),
            });
        };

        let timed_out = timed_out || process.timed_out();
        let verdict = classify(timed_out, process.status());
        let exit_code = process.exit_code();
        let duration_ms = u64::try_from(process.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (output, error_output) = process.take_output();
        self.result_read = true;

        Ok(MutantResult {
            mutation: self.mutation.clone(),
            verdict,
            tests: self.tests.clone(),
            output,
            error_output,
            exit_code,
            duration_ms,
        })
    }
}
