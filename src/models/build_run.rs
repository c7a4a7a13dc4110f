use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LABEL_BUILD_NAME, ObjectKey, RetentionPolicy};

/// Outcome of a build run as reported by the execution engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No verdict yet (queued or running).
    #[default]
    Pending,
    Succeeded,
    Failed,
}

impl RunOutcome {
    /// The terminal outcome, or `None` while the run has no verdict.
    pub fn terminal(self) -> Option<TerminalOutcome> {
        match self {
            RunOutcome::Pending => None,
            RunOutcome::Succeeded => Some(TerminalOutcome::Succeeded),
            RunOutcome::Failed => Some(TerminalOutcome::Failed),
        }
    }
}

/// A verdict a build run can finish with. Retention knobs are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Succeeded,
    Failed,
}

impl TerminalOutcome {
    pub const ALL: [TerminalOutcome; 2] = [TerminalOutcome::Succeeded, TerminalOutcome::Failed];

    pub fn as_str(self) -> &'static str {
        match self {
            TerminalOutcome::Succeeded => "succeeded",
            TerminalOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TerminalOutcome> for RunOutcome {
    fn from(outcome: TerminalOutcome) -> Self {
        match outcome {
            TerminalOutcome::Succeeded => RunOutcome::Succeeded,
            TerminalOutcome::Failed => RunOutcome::Failed,
        }
    }
}

/// One execution of a build.
///
/// `completion_time` is set together with a terminal `outcome` and never
/// changes afterwards. `retention` is the owning build's policy as it was
/// when the run completed; later edits to the build do not touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRun {
    pub namespace: String,
    pub name: String,
    /// Name of the owning build, in the same namespace.
    pub build_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub outcome: RunOutcome,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    /// Retention policy snapshot taken at completion.
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    /// Name of the task run backing this build run, if one was created.
    #[serde(default)]
    pub task_run_ref: Option<String>,
}

impl BuildRun {
    /// Create a pending run owned by `build_name`, labelled for owner lookups.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        build_name: impl Into<String>,
    ) -> Self {
        let build_name = build_name.into();
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_BUILD_NAME.to_string(), build_name.clone());
        Self {
            namespace: namespace.into(),
            name: name.into(),
            build_name,
            labels,
            outcome: RunOutcome::Pending,
            completion_time: None,
            retention: None,
            task_run_ref: None,
        }
    }

    pub fn with_task_run(mut self, task_run: impl Into<String>) -> Self {
        self.task_run_ref = Some(task_run.into());
        self
    }

    /// Record the verdict, snapshotting the build's current retention policy.
    ///
    /// Returns `false` and leaves the run untouched if it already completed.
    pub fn complete(
        &mut self,
        outcome: TerminalOutcome,
        at: DateTime<Utc>,
        retention: Option<RetentionPolicy>,
    ) -> bool {
        if self.completion_time.is_some() || self.outcome != RunOutcome::Pending {
            return false;
        }
        self.outcome = outcome.into();
        self.completion_time = Some(at);
        self.retention = retention;
        true
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.terminal().is_some()
    }

    /// Terminal outcome and completion time, if the run finished.
    ///
    /// A run reporting a verdict without a completion time violates the
    /// completion invariant and yields `None`.
    pub fn completion(&self) -> Option<(TerminalOutcome, DateTime<Utc>)> {
        Some((self.outcome.terminal()?, self.completion_time?))
    }

    /// Whether outcome and completion time agree.
    pub fn is_consistent(&self) -> bool {
        self.is_terminal() == self.completion_time.is_some()
    }

    pub fn task_run_key(&self) -> Option<ObjectKey> {
        self.task_run_ref
            .as_ref()
            .map(|name| ObjectKey::new(&self.namespace, name))
    }
}

/// The execution-engine object backing a build run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    pub namespace: String,
    pub name: String,
    /// Name of the build run that created this task run.
    pub owner: String,
}

impl TaskRun {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            owner: owner.into(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}
