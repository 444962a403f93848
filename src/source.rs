//! Mutation source contract and a catalogue-backed implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::mutant::{MutableUnit, Mutation};

/// Mutation source errors. Fatal to a run.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Catalogue could not be read.
    #[error("failed to read mutation catalogue {path}: {source}")]
    Io {
        /// Catalogue path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Catalogue is not a JSON array of mutations.
    #[error("malformed mutation catalogue {path}: {source}")]
    Parse {
        /// Catalogue path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// Generation failed for one unit.
    #[error("failed to generate mutations for {unit}: {message}")]
    Generate {
        /// Unit path.
        unit: PathBuf,
        /// Generator detail.
        message: String,
    },
}

/// Produces the mutations for a unit.
pub trait MutationSource {
    /// Mutations for `unit`, in a stable order.
    fn generate(&mut self, unit: &MutableUnit) -> Result<Vec<Mutation>, SourceError>;

    /// Release anything held for `unit`. Called once per unit after its
    /// mutants were handled.
    fn cleanup(&mut self, _unit: &MutableUnit) {}
}

/// Mutations listed up front, typically by an external generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSource {
    by_file: BTreeMap<PathBuf, Vec<Mutation>>,
}

impl CatalogSource {
    /// Read a JSON array of mutation descriptors.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mutations: Vec<Mutation> =
            serde_json::from_str(&raw).map_err(|source| SourceError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            catalogue = %path.display(),
            mutations = mutations.len(),
            "mutation catalogue loaded"
        );
        Ok(Self::from_mutations(mutations))
    }

    /// Group in-memory mutations by file, keeping input order per file.
    pub fn from_mutations(mutations: impl IntoIterator<Item = Mutation>) -> Self {
        let mut by_file: BTreeMap<PathBuf, Vec<Mutation>> = BTreeMap::new();
        for mutation in mutations {
            by_file
                .entry(mutation.file.clone())
                .or_default()
                .push(mutation);
        }
        Self { by_file }
    }

    /// One unit per file in the catalogue, sorted.
    pub fn units(&self) -> Vec<MutableUnit> {
        self.by_file.keys().cloned().map(MutableUnit::new).collect()
    }

    /// Total number of mutations.
    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    /// True if the catalogue holds no mutation.
    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }
}

impl MutationSource for CatalogSource {
    fn generate(&mut self, unit: &MutableUnit) -> Result<Vec<Mutation>, SourceError> {
        Ok(self.by_file.get(unit.path()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn groups_by_file_in_input_order() {
        let mut source = CatalogSource::from_mutations([
            Mutation::new("src/b.rs", 9, "op", "x", "y"),
            Mutation::new("src/a.rs", 4, "op", "x", "y"),
            Mutation::new("src/b.rs", 2, "op", "x", "y"),
        ]);
        assert_eq!(source.len(), 3);
        assert_eq!(
            source.units(),
            vec![MutableUnit::new("src/a.rs"), MutableUnit::new("src/b.rs")]
        );

        let lines: Vec<u32> = source
            .generate(&MutableUnit::new("src/b.rs"))
            .expect("generate should succeed")
            .iter()
            .map(|m| m.line)
            .collect();
        assert_eq!(lines, vec![9, 2]);
    }

    #[test]
    fn unknown_unit_has_no_mutations() {
        let mut source = CatalogSource::default();
        assert!(source.is_empty());
        let mutations = source
            .generate(&MutableUnit::new("src/none.rs"))
            .expect("generate should succeed");
        assert!(mutations.is_empty());
    }

    #[test]
    fn load_reads_json_catalogue() {
        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("mutations.json");
        std::fs::write(
            &path,
            r#"[{"file": "src/a.rs", "line": 3, "operator": "negate", "original": "a", "mutated": "!a"}]"#,
        )
        .expect("catalogue should be written");

        let source = CatalogSource::load(&path).expect("catalogue should load");
        assert_eq!(source.units(), vec![MutableUnit::new("src/a.rs")]);

        std::fs::write(&path, "{}").expect("catalogue should be written");
        assert!(matches!(
            CatalogSource::load(&path),
            Err(SourceError::Parse { .. })
        ));
        assert!(matches!(
            CatalogSource::load(&tmp.path().join("missing.json")),
            Err(SourceError::Io { .. })
        ));
    }
}
