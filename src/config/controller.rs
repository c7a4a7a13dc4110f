//! Reconcile controller configuration.
//!
//! # Example
//!
//! ```toml
//! [controller]
//! max_concurrent_reconciles = 4
//! reconcile_timeout_secs = 60
//! initial_backoff_ms = 5
//! max_backoff_secs = 1000
//! legacy_policy_fallback = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls how reconcile requests are dispatched and bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Maximum number of reconciles running at once.
    /// Requests for the same object never run concurrently.
    /// Default: 4
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Upper bound on a single reconcile, including delete confirmation.
    /// A reconcile exceeding it is aborted and retried.
    /// Default: 60
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,

    /// Delay before the first retry of a failed reconcile.
    /// Each further failure of the same request doubles it.
    /// Default: 5
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay.
    /// Default: 1000
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Use the build's live retention policy for runs completed without a
    /// policy snapshot (runs recorded before snapshots existed).
    /// Default: false (such runs have no TTL)
    #[serde(default)]
    pub legacy_policy_fallback: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            legacy_policy_fallback: false,
        }
    }
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_reconcile_timeout_secs() -> u64 {
    60
}

fn default_initial_backoff_ms() -> u64 {
    5
}

fn default_max_backoff_secs() -> u64 {
    1000
}

impl ControllerConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Retry delay after `failures` consecutive failures of one request.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.initial_backoff()
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_reconciles == 0 {
            return Err("controller.max_concurrent_reconciles must be at least 1".into());
        }
        if self.reconcile_timeout_secs == 0 {
            return Err("controller.reconcile_timeout_secs must be at least 1".into());
        }
        if self.initial_backoff() > self.max_backoff() {
            return Err(
                "controller.initial_backoff_ms must not exceed controller.max_backoff_secs".into(),
            );
        }
        Ok(())
    }
}
