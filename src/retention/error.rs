use std::time::Duration;

use thiserror::Error;

use crate::{
    models::{ObjectKey, PolicyError},
    store::StoreError,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reconcile timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reconcile cancelled")]
    Cancelled,

    #[error("{0}")]
    InvalidPolicy(#[from] PolicyError),

    /// Some selected runs could not be deleted. `deleted` holds the ones
    /// that were.
    #[error("Failed to delete {failed} of {attempted} build runs")]
    PartialFailure {
        failed: usize,
        attempted: usize,
        deleted: Vec<ObjectKey>,
    },
}

impl ReconcileError {
    /// Whether running the same request again can succeed.
    ///
    /// An invalid policy stays invalid until the build is edited, and that
    /// edit triggers a fresh reconcile on its own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::InvalidPolicy(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store(_) => "store",
            ReconcileError::Timeout(_) => "timeout",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::InvalidPolicy(_) => "invalid_policy",
            ReconcileError::PartialFailure { .. } => "partial_failure",
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
