//! Count-limit selection.
//!
//! Pure functions over a build's runs: no I/O, no clock, deterministic for a
//! given input.

use crate::models::{BuildRun, RetentionPolicy, TerminalOutcome};

/// A build's runs split by terminal outcome.
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub succeeded: Vec<&'a BuildRun>,
    pub failed: Vec<&'a BuildRun>,
    /// Runs with a verdict but no completion time. They are never selected.
    pub inconsistent: Vec<&'a BuildRun>,
}

impl<'a> Partition<'a> {
    pub fn outcome(&self, outcome: TerminalOutcome) -> &[&'a BuildRun] {
        match outcome {
            TerminalOutcome::Succeeded => &self.succeeded,
            TerminalOutcome::Failed => &self.failed,
        }
    }
}

/// Split runs by outcome. Pending runs are dropped.
pub fn partition(runs: &[BuildRun]) -> Partition<'_> {
    let mut partition = Partition::default();
    for run in runs {
        match (run.outcome.terminal(), run.completion_time) {
            (None, _) => {}
            (Some(_), None) => partition.inconsistent.push(run),
            (Some(TerminalOutcome::Succeeded), Some(_)) => partition.succeeded.push(run),
            (Some(TerminalOutcome::Failed), Some(_)) => partition.failed.push(run),
        }
    }
    partition
}

/// Runs selected for deletion because their outcome exceeds its count limit.
#[derive(Debug, Default)]
pub struct DeletionSet<'a> {
    pub succeeded: Vec<&'a BuildRun>,
    pub failed: Vec<&'a BuildRun>,
    pub inconsistent: Vec<&'a BuildRun>,
}

impl<'a> DeletionSet<'a> {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Selected runs with their outcome, failed runs first, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (TerminalOutcome, &'a BuildRun)> + '_ {
        self.failed
            .iter()
            .map(|run| (TerminalOutcome::Failed, *run))
            .chain(
                self.succeeded
                    .iter()
                    .map(|run| (TerminalOutcome::Succeeded, *run)),
            )
    }
}

/// Select the oldest runs of each outcome beyond the policy's count limit.
///
/// Runs are ordered by completion time, ties broken by name, and exactly
/// `len - limit` of the oldest are selected. A limit of zero is invalid and
/// selects nothing.
pub fn select_excess<'a>(runs: &'a [BuildRun], policy: &RetentionPolicy) -> DeletionSet<'a> {
    let partition = partition(runs);
    DeletionSet {
        succeeded: excess(
            partition.succeeded,
            policy.limit_for(TerminalOutcome::Succeeded),
        ),
        failed: excess(partition.failed, policy.limit_for(TerminalOutcome::Failed)),
        inconsistent: partition.inconsistent,
    }
}

fn excess(mut runs: Vec<&BuildRun>, limit: Option<u32>) -> Vec<&BuildRun> {
    let Some(limit) = limit.filter(|l| *l > 0) else {
        return Vec::new();
    };
    let keep = limit as usize;
    if runs.len() <= keep {
        return Vec::new();
    }

    runs.sort_by(|a, b| {
        a.completion_time
            .cmp(&b.completion_time)
            .then_with(|| a.name.cmp(&b.name))
    });
    runs.truncate(runs.len() - keep);
    runs
}
