//! Retention for completed build runs.
//!
//! Two independent policies apply to a build's runs:
//! - **Count limits** keep only the newest N succeeded and/or failed runs.
//!   They are enforced when a build is created, its policy changes, or one
//!   of its runs is created or completes.
//! - **Time-to-live** deletes a run a fixed time after it completed. It is
//!   enforced per run, using the policy snapshot the run took at completion,
//!   and re-evaluated exactly when the TTL elapses.
//!
//! Deleting a run also deletes its task run, then waits (bounded) for the run
//! to disappear. All deletions support dry-run mode.

pub mod deleter;
mod error;
pub mod expiry;
pub mod filter;
pub mod queue;
pub mod reconciler;
pub mod selection;
pub mod sweep;
pub mod worker;

pub use deleter::{ArtifactOutcome, CascadingDeleter, DeletionOutcome};
pub use error::{ReconcileError, ReconcileResult};
pub use expiry::Expiry;
pub use filter::{ChangeEvent, WatchEvent};
pub use queue::WorkQueue;
pub use reconciler::{ReconcileOutcome, ReconcileRequest, ResourceKind, RetentionReconciler};
pub use sweep::SweepReport;
pub use worker::RetentionController;
