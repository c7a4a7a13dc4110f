use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::{ObjectKey, TerminalOutcome};

/// A reusable build definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
}

impl Build {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            retention: None,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// How many finished runs of a build to keep, and for how long.
///
/// Every knob is optional; an absent knob places no constraint of its kind.
/// Limits count runs of one outcome, TTLs are measured from completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Maximum number of succeeded runs to keep.
    #[serde(default)]
    pub succeeded_limit: Option<u32>,

    /// Maximum number of failed runs to keep.
    #[serde(default)]
    pub failed_limit: Option<u32>,

    /// Seconds a succeeded run is kept after completion.
    #[serde(default)]
    pub ttl_after_succeeded_secs: Option<u64>,

    /// Seconds a failed run is kept after completion.
    #[serde(default)]
    pub ttl_after_failed_secs: Option<u64>,
}

impl RetentionPolicy {
    pub fn limit_for(&self, outcome: TerminalOutcome) -> Option<u32> {
        match outcome {
            TerminalOutcome::Succeeded => self.succeeded_limit,
            TerminalOutcome::Failed => self.failed_limit,
        }
    }

    /// TTL for runs finishing with `outcome`.
    ///
    /// A TTL too large to represent is treated as never elapsing.
    pub fn ttl_for(&self, outcome: TerminalOutcome) -> Option<TimeDelta> {
        let secs = match outcome {
            TerminalOutcome::Succeeded => self.ttl_after_succeeded_secs,
            TerminalOutcome::Failed => self.ttl_after_failed_secs,
        }?;
        i64::try_from(secs).ok().and_then(TimeDelta::try_seconds)
    }

    pub fn has_limits(&self) -> bool {
        self.succeeded_limit.is_some() || self.failed_limit.is_some()
    }

    pub fn has_ttls(&self) -> bool {
        self.ttl_after_succeeded_secs.is_some() || self.ttl_after_failed_secs.is_some()
    }

    /// Check that every configured knob is positive.
    ///
    /// This is the same check the admission validator applies; all violations
    /// are reported, not just the first.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut violations = Vec::new();
        for outcome in TerminalOutcome::ALL {
            if self.limit_for(outcome) == Some(0) {
                violations.push(PolicyViolation::NonPositiveLimit(outcome));
            }
        }
        for (outcome, secs) in [
            (TerminalOutcome::Succeeded, self.ttl_after_succeeded_secs),
            (TerminalOutcome::Failed, self.ttl_after_failed_secs),
        ] {
            if secs == Some(0) {
                violations.push(PolicyViolation::NonPositiveTtl(outcome));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(PolicyError { violations })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("{0} limit must be positive")]
    NonPositiveLimit(TerminalOutcome),

    #[error("ttl after {0} must be positive")]
    NonPositiveTtl(TerminalOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "invalid retention policy: {}",
    .violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
)]
pub struct PolicyError {
    pub violations: Vec<PolicyViolation>,
}
