//! Cascading deletion of a single build run.
//!
//! Deleting a run happens in three steps:
//! 1. Delete the task run the build run references, if any. Failures are
//!    logged and counted but never stop the cascade.
//! 2. Delete the build run itself. A run that is already gone counts as
//!    deleted.
//! 3. Poll until the run, and the task run if step 1 deleted it, are no
//!    longer visible. Both share one deadline of
//!    `deletion.confirm_timeout_secs`. An unconfirmed delete is logged and
//!    reported, not retried.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{ReconcileError, ReconcileResult};
use crate::{
    config::DeletionConfig,
    models::{BuildRun, ObjectKey},
    observability::metrics,
    store::{RecordStore, StoreError},
};

/// What happened to the task run referenced by a deleted build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// The build run references no task run.
    NoArtifact,
    Deleted,
    /// The referenced task run was already gone.
    Missing,
    /// The delete failed; the task run may outlive its build run.
    Failed,
}

/// Result of deleting one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub key: ObjectKey,
    pub artifact: ArtifactOutcome,
    /// Whether the run and its deleted task run were observed gone before
    /// the confirmation timeout.
    pub confirmed: bool,
    /// Nothing was deleted; the deletion was only logged.
    pub dry_run: bool,
}

/// Deletes build runs together with their task runs.
#[derive(Clone)]
pub struct CascadingDeleter {
    store: Arc<dyn RecordStore>,
    config: DeletionConfig,
}

impl CascadingDeleter {
    pub fn new(store: Arc<dyn RecordStore>, config: DeletionConfig) -> Self {
        Self { store, config }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Delete `run` and the task run it references.
    ///
    /// Fails only if the build run delete itself fails or `cancel` fires
    /// while waiting for confirmation.
    pub async fn delete(
        &self,
        run: &BuildRun,
        cancel: &CancellationToken,
    ) -> ReconcileResult<DeletionOutcome> {
        let key = run.key();

        if self.config.dry_run {
            tracing::info!(
                build_run = %key,
                build = %run.build_name,
                task_run = run.task_run_ref.as_deref(),
                "DRY RUN: Would delete build run and its task run"
            );
            return Ok(DeletionOutcome {
                key,
                artifact: ArtifactOutcome::NoArtifact,
                confirmed: false,
                dry_run: true,
            });
        }

        let artifact = self.delete_task_run(run).await;

        match self.store.delete_build_run(&key).await {
            Ok(()) => {
                tracing::debug!(build_run = %key, "Requested build run deletion");
            }
            Err(StoreError::NotFound) => {
                tracing::debug!(build_run = %key, "Build run already deleted");
            }
            Err(e) => {
                tracing::error!(
                    build_run = %key,
                    error = %e,
                    "Failed to delete build run"
                );
                return Err(e.into());
            }
        }

        let confirmed = if self.config.confirms_deletes() {
            let deadline = Instant::now() + self.config.confirm_timeout();
            let run_gone = self
                .confirm_deleted(Watched::BuildRun(&key), deadline, cancel)
                .await?;
            let task_run_gone = match run.task_run_key() {
                Some(task_run) if artifact == ArtifactOutcome::Deleted => {
                    self.confirm_deleted(Watched::TaskRun(&task_run), deadline, cancel)
                        .await?
                }
                _ => true,
            };
            run_gone && task_run_gone
        } else {
            false
        };

        Ok(DeletionOutcome {
            key,
            artifact,
            confirmed,
            dry_run: false,
        })
    }

    async fn delete_task_run(&self, run: &BuildRun) -> ArtifactOutcome {
        let Some(task_run) = run.task_run_key() else {
            return ArtifactOutcome::NoArtifact;
        };

        match self.store.delete_task_run(&task_run).await {
            Ok(()) => {
                tracing::debug!(
                    build_run = %run.key(),
                    task_run = %task_run,
                    "Deleted task run"
                );
                ArtifactOutcome::Deleted
            }
            Err(StoreError::NotFound) => {
                tracing::debug!(
                    build_run = %run.key(),
                    task_run = %task_run,
                    "Task run already gone"
                );
                ArtifactOutcome::Missing
            }
            Err(e) => {
                tracing::warn!(
                    build_run = %run.key(),
                    task_run = %task_run,
                    error = %e,
                    "Failed to delete task run, deleting build run anyway"
                );
                metrics::record_artifact_cleanup_failure();
                ArtifactOutcome::Failed
            }
        }
    }

    /// Poll until `target` disappears or `deadline` passes, checking once
    /// immediately.
    ///
    /// Read errors during the poll count as "still present".
    async fn confirm_deleted(
        &self,
        target: Watched<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ReconcileResult<bool> {
        let interval = self.config.confirm_poll_interval();

        loop {
            let lookup = match target {
                Watched::BuildRun(key) => self.store.get_build_run(key).await.map(|_| ()),
                Watched::TaskRun(key) => self.store.get_task_run(key).await.map(|_| ()),
            };
            match lookup {
                Err(StoreError::NotFound) => return Ok(true),
                Ok(()) => {}
                Err(e) => {
                    tracing::debug!(
                        kind = target.kind(),
                        object = %target.key(),
                        error = %e,
                        "Failed to check deletion"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    kind = target.kind(),
                    object = %target.key(),
                    timeout_secs = self.config.confirm_timeout_secs,
                    "Object still present after deletion, not waiting any longer"
                );
                return Ok(false);
            }

            let wait = interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// An object whose deletion is being confirmed.
#[derive(Clone, Copy)]
enum Watched<'a> {
    BuildRun(&'a ObjectKey),
    TaskRun(&'a ObjectKey),
}

impl Watched<'_> {
    fn kind(self) -> &'static str {
        match self {
            Watched::BuildRun(_) => "build_run",
            Watched::TaskRun(_) => "task_run",
        }
    }

    fn key(&self) -> &ObjectKey {
        match self {
            Watched::BuildRun(key) | Watched::TaskRun(key) => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        models::{TaskRun, TerminalOutcome},
        store::{
            MemoryStore,
            test::{FaultyStore, Faults},
        },
    };

    fn finished_run(name: &str) -> BuildRun {
        let mut run = BuildRun::new("ci", name, "app").with_task_run(format!("{name}-tr"));
        run.complete(
            TerminalOutcome::Succeeded,
            Utc.timestamp_opt(0, 0).unwrap(),
            None,
        );
        run
    }

    fn seeded(run: &BuildRun) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.put_build_run(run.clone());
        if let Some(task_run) = &run.task_run_ref {
            store.put_task_run(TaskRun::new("ci", task_run, &run.name));
        }
        store
    }

    #[tokio::test]
    async fn test_deletes_run_and_task_run() {
        let run = finished_run("app-1");
        let store = seeded(&run);
        let deleter = CascadingDeleter::new(store.clone(), DeletionConfig::default());

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.artifact, ArtifactOutcome::Deleted);
        assert!(outcome.confirmed);
        assert!(!outcome.dry_run);
        assert!(!store.contains_build_run(&run.key()));
        assert!(!store.contains_task_run(&ObjectKey::new("ci", "app-1-tr")));
    }

    #[tokio::test]
    async fn test_missing_run_and_task_run_are_not_errors() {
        let run = finished_run("app-1");
        let store = Arc::new(MemoryStore::new());
        let deleter = CascadingDeleter::new(store, DeletionConfig::default());

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.artifact, ArtifactOutcome::Missing);
        assert!(outcome.confirmed);
    }

    #[tokio::test]
    async fn test_run_without_task_run() {
        let mut run = finished_run("app-1");
        run.task_run_ref = None;
        let store = seeded(&run);
        let deleter = CascadingDeleter::new(store.clone(), DeletionConfig::default());

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.artifact, ArtifactOutcome::NoArtifact);
        assert!(!store.contains_build_run(&run.key()));
    }

    #[tokio::test]
    async fn test_task_run_failure_does_not_block_run_delete() {
        let run = finished_run("app-1");
        let memory = seeded(&run);
        let store = Arc::new(FaultyStore::new(memory.clone()).with_faults(Faults {
            failing_task_run_deletes: true,
            ..Default::default()
        }));
        let deleter = CascadingDeleter::new(store, DeletionConfig::default());

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.artifact, ArtifactOutcome::Failed);
        assert!(!memory.contains_build_run(&run.key()));
        assert!(memory.contains_task_run(&ObjectKey::new("ci", "app-1-tr")));
    }

    #[tokio::test]
    async fn test_run_delete_failure_is_an_error() {
        let run = finished_run("app-1");
        let memory = seeded(&run);
        let store = Arc::new(FaultyStore::new(memory.clone()).with_faults(Faults {
            failing_run_deletes: ["app-1".to_string()].into(),
            ..Default::default()
        }));
        let deleter = CascadingDeleter::new(store, DeletionConfig::default());

        let err = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Store(_)));
        assert!(err.is_retryable());
        assert!(memory.contains_build_run(&run.key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_delete_times_out() {
        let run = finished_run("app-1");
        let store = Arc::new(FaultyStore::new(seeded(&run)).with_faults(Faults {
            lingering_deletes: true,
            ..Default::default()
        }));
        let deleter = CascadingDeleter::new(store.clone(), DeletionConfig::default());

        let started = Instant::now();
        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.confirmed);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        // One immediate check plus one per second until the deadline.
        assert_eq!(store.build_run_gets(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lingering_task_run_leaves_delete_unconfirmed() {
        let run = finished_run("app-1");
        let memory = seeded(&run);
        let store = Arc::new(FaultyStore::new(memory.clone()).with_faults(Faults {
            lingering_task_run_deletes: true,
            ..Default::default()
        }));
        let deleter = CascadingDeleter::new(store.clone(), DeletionConfig::default());

        let started = Instant::now();
        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.artifact, ArtifactOutcome::Deleted);
        assert!(!outcome.confirmed);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(!memory.contains_build_run(&run.key()));
        assert!(memory.contains_task_run(&ObjectKey::new("ci", "app-1-tr")));
        assert_eq!(store.task_run_gets(), 11);
    }

    #[tokio::test]
    async fn test_task_run_not_polled_when_delete_failed() {
        let run = finished_run("app-1");
        let store = Arc::new(FaultyStore::new(seeded(&run)).with_faults(Faults {
            failing_task_run_deletes: true,
            ..Default::default()
        }));
        let deleter = CascadingDeleter::new(store.clone(), DeletionConfig::default());

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.confirmed);
        assert_eq!(store.task_run_gets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_confirmation() {
        let run = finished_run("app-1");
        let store = Arc::new(FaultyStore::new(seeded(&run)).with_faults(Faults {
            lingering_deletes: true,
            ..Default::default()
        }));
        let deleter = CascadingDeleter::new(store, DeletionConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let err = deleter.delete(&run, &cancel).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_confirmation_disabled() {
        let run = finished_run("app-1");
        let store = Arc::new(FaultyStore::new(seeded(&run)));
        let config = DeletionConfig {
            confirm_timeout_secs: 0,
            ..Default::default()
        };
        let deleter = CascadingDeleter::new(store.clone(), config);

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.confirmed);
        assert_eq!(store.build_run_gets(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let run = finished_run("app-1");
        let memory = seeded(&run);
        let config = DeletionConfig {
            dry_run: true,
            ..Default::default()
        };
        let deleter = CascadingDeleter::new(memory.clone(), config);

        let outcome = deleter
            .delete(&run, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.dry_run);
        assert!(memory.contains_build_run(&run.key()));
        assert!(memory.contains_task_run(&ObjectKey::new("ci", "app-1-tr")));
    }
}
