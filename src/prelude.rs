//! Prelude module for convenient imports.
//!
//! # Example
//!
//! ```rust
//! use mutation_harness::prelude::*;
//!
//! let config = RunConfig::default().with_parallelism(2);
//! let orchestrator = Orchestrator::new(config, [MutableUnit::new("src/lib.rs")]);
//! assert_eq!(orchestrator.units().len(), 1);
//! ```

pub use crate::adapter::{AdapterError, Invocation, TapCommandAdapter, TestAdapter};
pub use crate::collector::{Collector, RunSummary};
pub use crate::config::{ConfigError, RunConfig};
pub use crate::coverage::{CoverageError, CoverageIndex, CoverageLookup, LineCoverage};
pub use crate::events::{EventLogObserver, read_event_log};
pub use crate::mutant::{MutableUnit, Mutation, TestId};
pub use crate::observer::{ProgressObserver, RunObserver, TracingObserver, UnitProgress};
pub use crate::orchestrator::{Orchestrator, RunError, RunReport};
pub use crate::outcome::{MutantResult, Verdict};
pub use crate::report::{ReportFormat, render_report};
pub use crate::source::{CatalogSource, MutationSource, SourceError};
