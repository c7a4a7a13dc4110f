use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{
    error::{StoreError, StoreResult},
    traits::RecordStore,
};
use crate::models::{Build, BuildRun, LabelSelector, ObjectKey, TaskRun};

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub builds: Vec<Build>,
    #[serde(default)]
    pub build_runs: Vec<BuildRun>,
    #[serde(default)]
    pub task_runs: Vec<TaskRun>,
}

/// In-memory record store using DashMap for concurrent access.
///
/// Deletes take effect immediately and nothing cascades: removing a build run
/// leaves its task run in place until it is deleted explicitly.
#[derive(Default)]
pub struct MemoryStore {
    builds: DashMap<ObjectKey, Build>,
    build_runs: DashMap<ObjectKey, BuildRun>,
    task_runs: DashMap<ObjectKey, TaskRun>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        for build in snapshot.builds {
            store.put_build(build);
        }
        for run in snapshot.build_runs {
            store.put_build_run(run);
        }
        for task_run in snapshot.task_runs {
            store.put_task_run(task_run);
        }
        store
    }

    /// Copy the current contents, each collection sorted by key.
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut builds: Vec<Build> = self.builds.iter().map(|e| e.value().clone()).collect();
        builds.sort_by_key(Build::key);
        let mut build_runs: Vec<BuildRun> =
            self.build_runs.iter().map(|e| e.value().clone()).collect();
        build_runs.sort_by_key(BuildRun::key);
        let mut task_runs: Vec<TaskRun> =
            self.task_runs.iter().map(|e| e.value().clone()).collect();
        task_runs.sort_by_key(TaskRun::key);
        StoreSnapshot {
            builds,
            build_runs,
            task_runs,
        }
    }

    /// Insert or replace a build, returning the previous version.
    pub fn put_build(&self, build: Build) -> Option<Build> {
        self.builds.insert(build.key(), build)
    }

    /// Insert or replace a build run, returning the previous version.
    pub fn put_build_run(&self, run: BuildRun) -> Option<BuildRun> {
        self.build_runs.insert(run.key(), run)
    }

    pub fn put_task_run(&self, task_run: TaskRun) -> Option<TaskRun> {
        self.task_runs.insert(task_run.key(), task_run)
    }

    pub fn contains_build_run(&self, key: &ObjectKey) -> bool {
        self.build_runs.contains_key(key)
    }

    pub fn contains_task_run(&self, key: &ObjectKey) -> bool {
        self.task_runs.contains_key(key)
    }

    /// Names of the build runs in `namespace`, sorted.
    pub fn build_run_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .build_runs
            .iter()
            .filter(|e| e.key().namespace == namespace)
            .map(|e| e.key().name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_build(&self, key: &ObjectKey) -> StoreResult<Build> {
        self.builds
            .get(key)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn get_build_run(&self, key: &ObjectKey) -> StoreResult<BuildRun> {
        self.build_runs
            .get(key)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list_build_runs(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<BuildRun>> {
        let mut runs: Vec<BuildRun> = self
            .build_runs
            .iter()
            .filter(|e| e.key().namespace == namespace && selector.matches(&e.value().labels))
            .map(|e| e.value().clone())
            .collect();
        runs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(runs)
    }

    async fn delete_build_run(&self, key: &ObjectKey) -> StoreResult<()> {
        self.build_runs
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_task_run(&self, key: &ObjectKey) -> StoreResult<TaskRun> {
        self.task_runs
            .get(key)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_task_run(&self, key: &ObjectKey) -> StoreResult<()> {
        self.task_runs
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}
