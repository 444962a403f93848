//! Line coverage index built from the baseline run.
//!
//! Artifact format (JSON):
//!
//! ```json
//! { "files": { "src/calc.rs": { "12": ["calc::adds", "calc::sums"] } } }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;

use crate::mutant::TestId;

/// File name used for the coverage artifact inside a scratch directory.
pub const COVERAGE_FILE_NAME: &str = "coverage.json";

/// Coverage artifact errors. Fatal to a run.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// Artifact could not be read.
    #[error("failed to read coverage artifact {path}: {source}")]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Artifact is not valid coverage JSON.
    #[error("malformed coverage artifact {path}: {source}")]
    Parse {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CoverageArtifact {
    #[serde(default)]
    files: BTreeMap<PathBuf, BTreeMap<u32, BTreeSet<TestId>>>,
}

/// Covering tests per line for one file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileCoverage {
    lines: BTreeMap<u32, BTreeSet<TestId>>,
}

/// Result of a line-level lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCoverage {
    /// Tests executing the line, in stable order.
    Covered(Vec<TestId>),
    /// The file is covered, this line is not.
    Uncovered,
}

impl FileCoverage {
    /// Tests that execute `line`.
    pub fn tests_for_line(&self, line: u32) -> LineCoverage {
        match self.lines.get(&line) {
            Some(tests) if !tests.is_empty() => LineCoverage::Covered(tests.iter().cloned().collect()),
            _ => LineCoverage::Uncovered,
        }
    }

    /// Number of lines with at least one covering test.
    pub fn covered_lines(&self) -> usize {
        self.lines.values().filter(|tests| !tests.is_empty()).count()
    }
}

/// Result of a file-level lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageLookup {
    /// At least one test executes the file.
    Covered(Arc<FileCoverage>),
    /// No test executes the file at all.
    Uncovered,
}

/// Maps source files to the tests executing each line. Read-only once built.
#[derive(Debug, Default)]
pub struct CoverageIndex {
    files: BTreeMap<PathBuf, Arc<FileCoverage>>,
    scratch: Option<TempDir>,
}

impl CoverageIndex {
    /// Load a coverage artifact written by the baseline run.
    pub fn load(path: &Path) -> Result<Self, CoverageError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoverageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: CoverageArtifact =
            serde_json::from_str(&raw).map_err(|source| CoverageError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let index = Self::from_files(artifact.files);
        tracing::debug!(
            artifact = %path.display(),
            files = index.files.len(),
            "coverage index loaded"
        );
        Ok(index)
    }

    /// Build an index from in-memory coverage.
    pub fn from_files<F, L>(files: F) -> Self
    where
        F: IntoIterator<Item = (PathBuf, L)>,
        L: IntoIterator<Item = (u32, BTreeSet<TestId>)>,
    {
        let mut merged: BTreeMap<PathBuf, FileCoverage> = BTreeMap::new();
        for (path, lines) in files {
            let entry = merged.entry(normalize(&path)).or_default();
            for (line, tests) in lines {
                entry.lines.entry(line).or_default().extend(tests);
            }
        }
        Self {
            files: merged
                .into_iter()
                .map(|(path, coverage)| (path, Arc::new(coverage)))
                .collect(),
            scratch: None,
        }
    }

    /// Take ownership of the scratch directory holding the artifact so it is
    /// removed on [`CoverageIndex::cleanup`] or drop.
    pub fn with_scratch_dir(mut self, scratch: TempDir) -> Self {
        self.scratch = Some(scratch);
        self
    }

    /// Coverage for `file`. Repeated calls return the same data.
    pub fn load_coverage_for(&self, file: &Path) -> CoverageLookup {
        match self.files.get(&normalize(file)) {
            Some(coverage) if coverage.covered_lines() > 0 => {
                CoverageLookup::Covered(Arc::clone(coverage))
            }
            _ => CoverageLookup::Uncovered,
        }
    }

    /// Number of files with any coverage data.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Release cached data and the scratch directory. Idempotent.
    pub fn cleanup(&mut self) {
        self.files.clear();
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(err) = scratch.close() {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove coverage scratch directory");
            }
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}
