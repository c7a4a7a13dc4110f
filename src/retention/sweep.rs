//! One-shot retention pass over everything in a store.
//!
//! Reconciles every build (count limits), then every remaining build run
//! (TTL), once each. Requeue-after results are reported instead of waited
//! for, so a sweep always finishes in bounded time.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{
    error::ReconcileError,
    reconciler::{ReconcileRequest, ResourceKind, RetentionReconciler},
};
use crate::{
    models::ObjectKey,
    store::{MemoryStore, StoreSnapshot},
};

/// Why a build run was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    CountLimit,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptRun {
    pub namespace: String,
    pub name: String,
    pub reason: DeletionReason,
}

/// A run whose TTL has not elapsed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingExpiry {
    pub namespace: String,
    pub name: String,
    /// Seconds until the run expires, rounded up.
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub error: String,
    pub retryable: bool,
}

/// Summary printed by the `sweep` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub builds_reconciled: usize,
    pub build_runs_reconciled: usize,
    pub deleted: Vec<SweptRun>,
    pub pending_expiries: Vec<PendingExpiry>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Run one retention pass over `store`.
///
/// Failures are collected in the report; the pass continues with the next
/// object. Cancellation stops the pass and returns what was done so far.
pub async fn run(
    store: &MemoryStore,
    reconciler: &RetentionReconciler,
    dry_run: bool,
    cancel: &CancellationToken,
) -> SweepReport {
    let mut report = SweepReport {
        dry_run,
        ..Default::default()
    };

    let StoreSnapshot { builds, .. } = store.snapshot();
    tracing::info!(builds = builds.len(), dry_run, "Starting retention sweep");

    for build in &builds {
        if cancel.is_cancelled() {
            return report;
        }
        let request = ReconcileRequest::build(build.key());
        report.builds_reconciled += 1;
        run_one(reconciler, &request, DeletionReason::CountLimit, &mut report, cancel).await;
    }

    // Runs deleted by count limits are gone from the store; in dry-run mode
    // they were only selected, so skip them here too.
    let swept: Vec<ObjectKey> = report
        .deleted
        .iter()
        .map(|run| ObjectKey::new(&run.namespace, &run.name))
        .collect();
    let runs: Vec<ObjectKey> = store
        .snapshot()
        .build_runs
        .iter()
        .map(|run| run.key())
        .filter(|key| !swept.contains(key))
        .collect();

    for key in runs {
        if cancel.is_cancelled() {
            return report;
        }
        let request = ReconcileRequest::build_run(key);
        report.build_runs_reconciled += 1;
        run_one(reconciler, &request, DeletionReason::Expired, &mut report, cancel).await;
    }

    tracing::info!(
        builds = report.builds_reconciled,
        build_runs = report.build_runs_reconciled,
        deleted = report.deleted.len(),
        pending_expiries = report.pending_expiries.len(),
        failures = report.failures.len(),
        dry_run,
        "Retention sweep complete"
    );
    report
}

async fn run_one(
    reconciler: &RetentionReconciler,
    request: &ReconcileRequest,
    reason: DeletionReason,
    report: &mut SweepReport,
    cancel: &CancellationToken,
) {
    let swept = |key: ObjectKey| SweptRun {
        namespace: key.namespace,
        name: key.name,
        reason,
    };

    match reconciler.reconcile(request, cancel).await {
        Ok(outcome) => {
            report.deleted.extend(outcome.deleted.into_iter().map(swept));
            if let Some(after) = outcome.requeue_after {
                report.pending_expiries.push(PendingExpiry {
                    namespace: request.key.namespace.clone(),
                    name: request.key.name.clone(),
                    expires_in_secs: after.as_secs() + u64::from(after.subsec_nanos() > 0),
                });
            }
        }
        Err(ReconcileError::Cancelled) => {}
        Err(e) => {
            tracing::error!(request = %request, error = %e, "Reconcile failed during sweep");
            if let ReconcileError::PartialFailure { deleted, .. } = &e {
                report.deleted.extend(deleted.iter().cloned().map(swept));
            }
            report.failures.push(SweepFailure {
                kind: request.kind,
                namespace: request.key.namespace.clone(),
                name: request.key.name.clone(),
                error: e.to_string(),
                retryable: e.is_retryable(),
            });
        }
    }
}
