use async_trait::async_trait;

use super::error::StoreResult;
use crate::models::{Build, BuildRun, LabelSelector, ObjectKey, TaskRun};

/// Access to builds, build runs and their task runs.
///
/// Reads may come from a cache and lag behind writes. Every method reports a
/// missing object as [`StoreError::NotFound`](super::StoreError::NotFound),
/// including deletes of objects that are already gone; callers decide whether
/// that is an error.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a build by namespace and name.
    async fn get_build(&self, key: &ObjectKey) -> StoreResult<Build>;

    /// Get a build run by namespace and name.
    async fn get_build_run(&self, key: &ObjectKey) -> StoreResult<BuildRun>;

    /// List the build runs in `namespace` whose labels match `selector`.
    async fn list_build_runs(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<BuildRun>>;

    /// Request deletion of a build run.
    async fn delete_build_run(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Get a task run by namespace and name.
    async fn get_task_run(&self, key: &ObjectKey) -> StoreResult<TaskRun>;

    /// Request deletion of a task run.
    async fn delete_task_run(&self, key: &ObjectKey) -> StoreResult<()>;
}
