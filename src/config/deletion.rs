//! Deletion behaviour for expired and excess build runs.
//!
//! # Example
//!
//! ```toml
//! [deletion]
//! dry_run = false
//! confirm_poll_interval_ms = 1000
//! confirm_timeout_secs = 10
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deletion settings.
///
/// After a build run delete is issued the deleter polls the store until the
/// run is gone. The poll only confirms the delete for the logs; a run that is
/// still visible when the timeout passes is not retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeletionConfig {
    /// If true, log what would be deleted without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Interval between confirmation polls.
    /// Default: 1000
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,

    /// How long to wait for a deleted run to disappear.
    /// Set to 0 to skip confirmation.
    /// Default: 10
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            confirm_poll_interval_ms: default_confirm_poll_interval_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

fn default_confirm_poll_interval_ms() -> u64 {
    1000
}

fn default_confirm_timeout_secs() -> u64 {
    10
}

impl DeletionConfig {
    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirms_deletes(&self) -> bool {
        self.confirm_timeout_secs > 0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.confirm_poll_interval_ms == 0 {
            return Err("deletion.confirm_poll_interval_ms must be positive".into());
        }
        if self.confirms_deletes() && self.confirm_poll_interval() > self.confirm_timeout() {
            return Err(
                "deletion.confirm_poll_interval_ms must not exceed deletion.confirm_timeout_secs"
                    .into(),
            );
        }
        Ok(())
    }
}
