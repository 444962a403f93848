//! Test-framework adapter contract and a TAP command adapter.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::config::RunConfig;
use crate::mutant::{Mutation, TestId};
use crate::process::ProcessHandle;

/// Adapter-level errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Test command line was empty.
    #[error("test command is empty")]
    EmptyCommand,
    /// The adapter cannot express this invocation.
    #[error("unsupported invocation: {0}")]
    Unsupported(String),
}

/// What a test process is being built for.
#[derive(Debug, Clone, Copy)]
pub enum Invocation<'a> {
    /// Initial, un-mutated run of the whole suite. The process is expected to
    /// write line coverage to `coverage_path`.
    Baseline {
        /// Coverage artifact destination.
        coverage_path: &'a Path,
    },
    /// One mutant, restricted to the tests that cover its line.
    Mutant {
        /// Mutation to apply.
        mutation: &'a Mutation,
        /// Covering tests.
        tests: &'a [TestId],
    },
}

impl Invocation<'_> {
    /// True for the baseline invocation.
    pub fn is_baseline(&self) -> bool {
        matches!(self, Self::Baseline { .. })
    }
}

/// Test-framework adapter contract.
pub trait TestAdapter {
    /// Whether a chunk of framework output reports passing tests.
    fn ok(&self, output: &str) -> bool;

    /// Build the command for an invocation.
    fn build_command(
        &self,
        config: &RunConfig,
        invocation: Invocation<'_>,
    ) -> Result<Command, AdapterError>;
}

/// Build a ready-to-start process for `invocation`.
///
/// Mutant runs get the configured per-mutant timeout, the baseline gets the
/// optional baseline timeout. A command the adapter fails to build becomes
/// an already-errored handle, never an error for the caller.
pub fn build_process(
    adapter: &dyn TestAdapter,
    config: &RunConfig,
    label: &str,
    invocation: Invocation<'_>,
) -> ProcessHandle {
    let timeout = if invocation.is_baseline() {
        config.baseline_timeout()
    } else {
        Some(config.timeout())
    };

    match adapter.build_command(config, invocation) {
        Ok(command) => ProcessHandle::new(label, command, timeout),
        Err(err) => ProcessHandle::unspawnable(label, err.to_string()),
    }
}

/// Environment variable carrying the invocation mode (`baseline`/`mutant`).
pub const ENV_MODE: &str = "MUTATION_HARNESS_MODE";
/// Environment variable carrying the coverage artifact path (baseline only).
pub const ENV_COVERAGE: &str = "MUTATION_HARNESS_COVERAGE";
/// Environment variable carrying the mutated file.
pub const ENV_FILE: &str = "MUTATION_HARNESS_FILE";
/// Environment variable carrying the mutated line.
pub const ENV_LINE: &str = "MUTATION_HARNESS_LINE";
/// Environment variable carrying the operator name.
pub const ENV_OPERATOR: &str = "MUTATION_HARNESS_OPERATOR";
/// Environment variable carrying the original snippet.
pub const ENV_ORIGINAL: &str = "MUTATION_HARNESS_ORIGINAL";
/// Environment variable carrying the mutated snippet.
pub const ENV_MUTATED: &str = "MUTATION_HARNESS_MUTATED";
/// Environment variable carrying covering test ids, one per line.
pub const ENV_TESTS: &str = "MUTATION_HARNESS_TESTS";

/// Runs a fixed command and reads TAP output.
///
/// The mutation and its covering tests are handed to the command through
/// the `MUTATION_HARNESS_*` environment variables; applying the mutation is
/// the command's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapCommandAdapter {
    program: String,
    args: Vec<String>,
}

impl TapCommandAdapter {
    /// Adapter for an explicit program and argument list.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line on whitespace.
    pub fn from_command_line(command_line: &str) -> Result<Self, AdapterError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(AdapterError::EmptyCommand)?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl TestAdapter for TapCommandAdapter {
    fn ok(&self, output: &str) -> bool {
        !output.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with("not ok") || line.starts_with("Bail out!")
        })
    }

    fn build_command(
        &self,
        config: &RunConfig,
        invocation: Invocation<'_>,
    ) -> Result<Command, AdapterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&config.project_dir);

        match invocation {
            Invocation::Baseline { coverage_path } => {
                cmd.env(ENV_MODE, "baseline")
                    .env(ENV_COVERAGE, coverage_path);
            }
            Invocation::Mutant { mutation, tests } => {
                cmd.env(ENV_MODE, "mutant")
                    .env(ENV_FILE, &mutation.file)
                    .env(ENV_LINE, mutation.line.to_string())
                    .env(ENV_OPERATOR, &mutation.operator)
                    .env(ENV_ORIGINAL, &mutation.original)
                    .env(ENV_MUTATED, &mutation.mutated)
                    .env(ENV_TESTS, tests.join("\n"));
            }
        }
        Ok(cmd)
    }
}
