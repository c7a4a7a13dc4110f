//! Counters for the retention reconciler.
//!
//! With the `metrics` feature enabled these go through the `metrics` facade,
//! so whichever recorder the embedding process installs receives them.
//! Without it every function is a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Record build runs deleted by the reconciler.
///
/// # Arguments
/// * `reason` - Why the runs were deleted (`count_limit` or `expired`)
/// * `count` - The number of runs deleted
pub fn record_retention_deletion(reason: &str, count: u64) {
    #[cfg(feature = "metrics")]
    {
        counter!(
            "retention_deletions_total",
            "reason" => reason.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (reason, count);
    }
}

/// Record a failed task run cleanup. The build run delete still proceeds.
pub fn record_artifact_cleanup_failure() {
    #[cfg(feature = "metrics")]
    {
        counter!("retention_artifact_cleanup_failures_total").increment(1);
    }
}

/// Record a completed reconcile.
///
/// `result` is `success`, `requeued` or the error kind.
pub fn record_reconcile(kind: &str, result: &str) {
    #[cfg(feature = "metrics")]
    {
        counter!(
            "retention_reconciles_total",
            "kind" => kind.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (kind, result);
    }
}
