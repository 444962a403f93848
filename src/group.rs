//! Bounded batch of concurrently running test processes.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::adapter::TestAdapter;
use crate::process::ProcessHandle;

/// Group construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    /// A group needs at least one process.
    #[error("a parallel group needs at least one process")]
    EmptyBatch,
}

/// Per-index outcome of one group run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOutcome {
    timed_out: BTreeMap<usize, bool>,
}

impl GroupOutcome {
    /// Whether the process at batch index `index` was killed for timing out.
    pub fn timed_out(&self, index: usize) -> bool {
        self.timed_out.get(&index).copied().unwrap_or(false)
    }

    /// Batch indices that were run, ascending.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.timed_out.keys().copied()
    }
}

/// Runs borrowed process handles side by side until all of them finish.
///
/// Handles are keyed by their position in the batch so results can be linked
/// back to mutations regardless of completion order.
pub struct ParallelGroup<'a> {
    members: BTreeMap<usize, &'a mut ProcessHandle>,
    adapter: &'a dyn TestAdapter,
    poll_interval: Duration,
}

impl<'a> ParallelGroup<'a> {
    /// Build a group over a non-empty batch.
    pub fn new(
        members: BTreeMap<usize, &'a mut ProcessHandle>,
        adapter: &'a dyn TestAdapter,
        poll_interval: Duration,
    ) -> Result<Self, GroupError> {
        if members.is_empty() {
            return Err(GroupError::EmptyBatch);
        }
        Ok(Self {
            members,
            adapter,
            poll_interval,
        })
    }

    /// Start every member, then poll until none is running.
    ///
    /// Consumes the group, releasing the borrowed handles.
    pub fn run(mut self) -> GroupOutcome {
        for handle in self.members.values_mut() {
            handle.start();
        }
        tracing::debug!(processes = self.members.len(), "batch started");

        thread::sleep(self.poll_interval);
        while self.still_running() {
            thread::sleep(self.poll_interval);
        }

        let timed_out = self
            .members
            .iter()
            .map(|(index, handle)| (*index, handle.timed_out()))
            .collect();
        self.members.clear();
        GroupOutcome { timed_out }
    }

    // Polls every member on each pass, including members after one that is
    // still running.
    fn still_running(&mut self) -> bool {
        let adapter = self.adapter;
        let mut running = false;
        for handle in self.members.values_mut() {
            if handle.poll(adapter) {
                running = true;
            }
        }
        running
    }
}
