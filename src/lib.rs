//! # mutation-harness
//!
//! `mutation-harness` runs mutation testing against an external test suite:
//! - a baseline run of the un-mutated suite that also produces line coverage
//! - per-mutation runs restricted to the tests covering the mutated line
//! - bounded-parallel process batches with timeout detection
//! - classification into kill, escape, error, timeout and shadow verdicts
//! - aggregation, observers, a JSONL event log and rendered reports
//!
//! Mutation generation and the test framework stay outside the crate, behind
//! [`source::MutationSource`] and [`adapter::TestAdapter`].

#![warn(missing_docs)]

pub mod adapter;
pub mod collector;
pub mod config;
pub mod coverage;
pub mod events;
pub mod group;
pub mod mutant;
pub mod observer;
pub mod orchestrator;
pub mod outcome;
pub mod prelude;
pub mod process;
pub mod report;
pub mod source;
pub mod timer;
