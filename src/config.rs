//! Run-wide configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-mutant timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default sleep between polls of a running batch.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Per-mutant timeout must be positive.
    #[error(
        "the timeout must be greater than zero, and greater than the slowest test run under any constraint is recommended"
    )]
    ZeroTimeout,
    /// Poll interval must be positive.
    #[error("the poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// Configuration for a mutation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Directory where test commands are executed.
    pub project_dir: PathBuf,
    /// Number of mutants run concurrently in one batch.
    pub parallelism: usize,
    /// Per-mutant timeout in milliseconds.
    pub timeout_ms: u64,
    /// Optional timeout for the baseline run in milliseconds.
    pub baseline_timeout_ms: Option<u64>,
    /// Sleep between polls of a running batch, in milliseconds.
    pub poll_interval_ms: u64,
    /// Where the baseline run writes its coverage artifact. A scratch
    /// directory is used when unset.
    pub coverage_path: Option<PathBuf>,
    /// Optional JSON report written at the end of the run.
    pub log_json: Option<PathBuf>,
    /// Optional plain text report written at the end of the run.
    pub log_text: Option<PathBuf>,
    /// Optional JSONL event log appended during the run.
    pub event_log: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            // Concurrent test runs compete for uninsulated resources such as
            // shared files or databases.
            parallelism: 1,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            baseline_timeout_ms: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            coverage_path: None,
            log_json: None,
            log_text: None,
            event_log: None,
        }
    }
}

impl RunConfig {
    /// Set project directory.
    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    /// Set batch parallelism.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set per-mutant timeout in seconds.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_ms = timeout_secs.saturating_mul(1000);
        self
    }

    /// Set per-mutant timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set baseline timeout in milliseconds.
    pub fn with_baseline_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.baseline_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set poll interval in milliseconds.
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Set coverage artifact path.
    pub fn with_coverage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.coverage_path = Some(path.into());
        self
    }

    /// Set JSON report path.
    pub fn with_log_json(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_json = Some(path.into());
        self
    }

    /// Set text report path.
    pub fn with_log_text(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_text = Some(path.into());
        self
    }

    /// Set event log path.
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }

    /// Effective batch size, never below one.
    pub fn parallelism(&self) -> usize {
        self.parallelism.max(1)
    }

    /// Per-mutant timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Baseline timeout, if any.
    pub fn baseline_timeout(&self) -> Option<Duration> {
        self.baseline_timeout_ms.map(Duration::from_millis)
    }

    /// Poll interval for batch execution.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}
