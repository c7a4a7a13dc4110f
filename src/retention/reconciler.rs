//! The reconcile loop body.
//!
//! One invocation handles one [`ReconcileRequest`]:
//!
//! - **Build requests** enforce count limits. The build's runs are listed by
//!   owner label and the oldest runs beyond each outcome's limit are deleted.
//! - **Build run requests** enforce time-to-live. The run is deleted if its
//!   TTL has elapsed, otherwise the request asks to be retried exactly when
//!   it will.
//!
//! Invocations are stateless: every call re-reads what it needs from the
//! store, and deletes of objects that are already gone count as success, so
//! concurrent invocations for the same build are safe.

use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    deleter::CascadingDeleter,
    error::{ReconcileError, ReconcileResult},
    expiry::{self, Expiry},
    selection,
};
use crate::{
    clock::Clock,
    config::{ControllerConfig, DeletionConfig},
    models::{BuildRun, LabelSelector, ObjectKey, RetentionPolicy},
    observability::metrics,
    store::{OptionalExt, RecordStore},
};

/// The kind of object a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Build,
    BuildRun,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Build => "build",
            ResourceKind::BuildRun => "build_run",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    pub kind: ResourceKind,
    pub key: ObjectKey,
}

impl ReconcileRequest {
    pub fn build(key: ObjectKey) -> Self {
        Self {
            kind: ResourceKind::Build,
            key,
        }
    }

    pub fn build_run(key: ObjectKey) -> Self {
        Self {
            kind: ResourceKind::BuildRun,
            key,
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Build runs deleted, or in dry-run mode selected for deletion.
    pub deleted: Vec<ObjectKey>,
    /// Reconcile the same request again after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            deleted: Vec::new(),
            requeue_after: Some(after),
        }
    }

    fn result_label(&self) -> &'static str {
        if self.requeue_after.is_some() {
            "requeued"
        } else {
            "success"
        }
    }
}

/// Brings build runs into compliance with their retention policies.
///
/// The store, clock and settings are all injected, so the same reconciler
/// serves the long-running controller, the one-shot sweep and the tests.
pub struct RetentionReconciler {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    deleter: CascadingDeleter,
    config: ControllerConfig,
}

impl RetentionReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        controller: ControllerConfig,
        deletion: DeletionConfig,
    ) -> Self {
        let deleter = CascadingDeleter::new(store.clone(), deletion);
        Self {
            store,
            clock,
            deleter,
            config: controller,
        }
    }

    /// Reconcile one request.
    ///
    /// Aborts with [`ReconcileError::Timeout`] once
    /// `controller.reconcile_timeout_secs` passes and with
    /// [`ReconcileError::Cancelled`] when `cancel` fires. Both leave the
    /// store consistent; runs already deleted stay deleted.
    pub async fn reconcile(
        &self,
        request: &ReconcileRequest,
        cancel: &CancellationToken,
    ) -> ReconcileResult<ReconcileOutcome> {
        let span = tracing::info_span!(
            "reconcile",
            kind = request.kind.as_str(),
            namespace = %request.key.namespace,
            name = %request.key.name,
            reconcile_id = %Uuid::new_v4()
        );

        async {
            let timeout = self.config.reconcile_timeout();
            let work = async {
                match request.kind {
                    ResourceKind::Build => self.reconcile_build(&request.key, cancel).await,
                    ResourceKind::BuildRun => {
                        self.reconcile_build_run(&request.key, cancel).await
                    }
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
                result = tokio::time::timeout(timeout, work) => {
                    result.unwrap_or(Err(ReconcileError::Timeout(timeout)))
                }
            };

            let label = match &result {
                Ok(outcome) => outcome.result_label(),
                Err(e) => e.kind(),
            };
            metrics::record_reconcile(request.kind.as_str(), label);
            result
        }
        .instrument(span)
        .await
    }

    /// Enforce a build's count limits.
    async fn reconcile_build(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> ReconcileResult<ReconcileOutcome> {
        let Some(build) = self.store.get_build(key).await.optional()? else {
            tracing::debug!("Build not found, nothing to do");
            return Ok(ReconcileOutcome::done());
        };
        let Some(policy) = build.retention.as_ref() else {
            tracing::debug!("Build has no retention policy");
            return Ok(ReconcileOutcome::done());
        };
        check_policy(policy)?;
        if !policy.has_limits() {
            tracing::debug!("Build has no count limits");
            return Ok(ReconcileOutcome::done());
        }

        let runs = self
            .store
            .list_build_runs(&key.namespace, &LabelSelector::for_build(&build.name))
            .await?;
        let selected = selection::select_excess(&runs, policy);

        for run in &selected.inconsistent {
            tracing::warn!(
                build_run = %run.key(),
                outcome = ?run.outcome,
                "Build run has a verdict but no completion time, skipping"
            );
        }

        if selected.is_empty() {
            tracing::debug!(runs = runs.len(), "Build runs within count limits");
            return Ok(ReconcileOutcome::done());
        }

        tracing::debug!(
            runs = runs.len(),
            succeeded_excess = selected.succeeded.len(),
            failed_excess = selected.failed.len(),
            "Deleting build runs beyond count limits"
        );

        let attempted = selected.len();
        let mut deleted = Vec::with_capacity(attempted);
        let mut failed = 0;

        for (outcome, run) in selected.iter() {
            match self.deleter.delete(run, cancel).await {
                Ok(result) => {
                    tracing::info!(
                        build_run = %result.key,
                        outcome = %outcome,
                        limit = policy.limit_for(outcome),
                        confirmed = result.confirmed,
                        dry_run = result.dry_run,
                        "Deleted build run beyond count limit"
                    );
                    deleted.push(result.key);
                }
                Err(ReconcileError::Cancelled) => return Err(ReconcileError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        build_run = %run.key(),
                        error = %e,
                        "Failed to delete build run, continuing with the rest"
                    );
                    failed += 1;
                }
            }
        }

        if !self.deleter.is_dry_run() {
            metrics::record_retention_deletion("count_limit", deleted.len() as u64);
        }

        if failed > 0 {
            return Err(ReconcileError::PartialFailure {
                failed,
                attempted,
                deleted,
            });
        }

        Ok(ReconcileOutcome {
            deleted,
            requeue_after: None,
        })
    }

    /// Enforce a build run's time-to-live.
    async fn reconcile_build_run(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> ReconcileResult<ReconcileOutcome> {
        let Some(run) = self.store.get_build_run(key).await.optional()? else {
            tracing::debug!("Build run not found, nothing to do");
            return Ok(ReconcileOutcome::done());
        };
        if !run.is_consistent() {
            tracing::warn!(
                outcome = ?run.outcome,
                completion_time = ?run.completion_time,
                "Build run outcome and completion time disagree, skipping"
            );
            return Ok(ReconcileOutcome::done());
        }
        if !run.is_terminal() {
            tracing::debug!("Build run still pending");
            return Ok(ReconcileOutcome::done());
        }

        let Some(policy) = self.effective_policy(&run).await? else {
            tracing::debug!("Build run has no retention policy");
            return Ok(ReconcileOutcome::done());
        };
        check_policy(&policy)?;

        match expiry::evaluate(&run, Some(&policy), self.clock.now()) {
            Expiry::Unconstrained => {
                tracing::debug!(outcome = ?run.outcome, "No TTL for this outcome");
                Ok(ReconcileOutcome::done())
            }
            Expiry::Pending {
                expires_at,
                remaining,
            } => {
                tracing::debug!(
                    expires_at = %expires_at,
                    requeue_after_ms = remaining.as_millis() as u64,
                    "Build run not expired yet"
                );
                Ok(ReconcileOutcome::requeue(remaining))
            }
            Expiry::Expired { expired_at } => {
                let result = self.deleter.delete(&run, cancel).await?;
                tracing::info!(
                    build_run = %result.key,
                    expired_at = %expired_at,
                    confirmed = result.confirmed,
                    dry_run = result.dry_run,
                    "Deleted expired build run"
                );
                if !result.dry_run {
                    metrics::record_retention_deletion("expired", 1);
                }
                Ok(ReconcileOutcome {
                    deleted: vec![result.key],
                    requeue_after: None,
                })
            }
        }
    }

    /// The policy a run's TTL is measured against.
    ///
    /// Normally the snapshot taken at completion. Runs completed before
    /// snapshots existed fall back to the owning build's current policy when
    /// `controller.legacy_policy_fallback` is set.
    async fn effective_policy(&self, run: &BuildRun) -> ReconcileResult<Option<RetentionPolicy>> {
        if let Some(snapshot) = &run.retention {
            return Ok(Some(snapshot.clone()));
        }
        if !self.config.legacy_policy_fallback {
            return Ok(None);
        }

        let owner = ObjectKey::new(&run.namespace, &run.build_name);
        let build = self.store.get_build(&owner).await.optional()?;
        if build.is_some() {
            tracing::debug!(
                build = %owner,
                "Using the build's current policy for a run without snapshot"
            );
        }
        Ok(build.and_then(|b| b.retention))
    }
}

fn check_policy(policy: &RetentionPolicy) -> ReconcileResult<()> {
    policy.validate().map_err(|e| {
        tracing::error!(error = %e, "Refusing to apply invalid retention policy");
        ReconcileError::from(e)
    })
}
