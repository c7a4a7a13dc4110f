//! Time-to-live evaluation for a single build run.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{BuildRun, RetentionPolicy};

/// TTL state of one build run at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No TTL applies: the run has no verdict yet, or its outcome has no TTL.
    Unconstrained,
    /// The TTL has elapsed; the run should be deleted now.
    Expired { expired_at: DateTime<Utc> },
    /// The TTL elapses at `expires_at`, `remaining` from now.
    Pending {
        expires_at: DateTime<Utc>,
        remaining: Duration,
    },
}

impl Expiry {
    /// Delay after which the run must be evaluated again, if any.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Expiry::Pending { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }
}

/// Evaluate `run` against `policy` at `now`.
///
/// The expiry instant is `completion_time + ttl` for the TTL matching the
/// run's outcome. A run is expired once `now` reaches that instant.
pub fn evaluate(run: &BuildRun, policy: Option<&RetentionPolicy>, now: DateTime<Utc>) -> Expiry {
    let Some((outcome, completed_at)) = run.completion() else {
        return Expiry::Unconstrained;
    };
    let Some(ttl) = policy.and_then(|p| p.ttl_for(outcome)) else {
        return Expiry::Unconstrained;
    };
    let Some(expires_at) = completed_at.checked_add_signed(ttl) else {
        return Expiry::Unconstrained;
    };

    if now >= expires_at {
        Expiry::Expired {
            expired_at: expires_at,
        }
    } else {
        Expiry::Pending {
            expires_at,
            remaining: (expires_at - now).to_std().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;

    use super::*;
    use crate::models::TerminalOutcome;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ttl_policy(succeeded: Option<u64>, failed: Option<u64>) -> RetentionPolicy {
        RetentionPolicy {
            ttl_after_succeeded_secs: succeeded,
            ttl_after_failed_secs: failed,
            ..Default::default()
        }
    }

    fn completed(outcome: TerminalOutcome, secs: i64) -> BuildRun {
        let mut run = BuildRun::new("ci", "app-1", "app");
        run.complete(outcome, at(secs), None);
        run
    }

    #[rstest]
    #[case(3, Expiry::Pending { expires_at: at(5), remaining: Duration::from_secs(2) })]
    #[case(5, Expiry::Expired { expired_at: at(5) })]
    #[case(6, Expiry::Expired { expired_at: at(5) })]
    fn test_failed_ttl(#[case] now: i64, #[case] expected: Expiry) {
        let run = completed(TerminalOutcome::Failed, 0);
        let policy = ttl_policy(None, Some(5));
        assert_eq!(evaluate(&run, Some(&policy), at(now)), expected);
    }

    #[test]
    fn test_ttl_chosen_by_outcome() {
        let policy = ttl_policy(Some(100), Some(10));
        let succeeded = completed(TerminalOutcome::Succeeded, 0);
        assert_eq!(
            evaluate(&succeeded, Some(&policy), at(50)).requeue_after(),
            Some(Duration::from_secs(50))
        );

        let failed = completed(TerminalOutcome::Failed, 0);
        assert!(matches!(
            evaluate(&failed, Some(&policy), at(50)),
            Expiry::Expired { .. }
        ));
    }

    #[test]
    fn test_no_ttl_for_outcome() {
        let run = completed(TerminalOutcome::Succeeded, 0);
        let policy = ttl_policy(None, Some(5));
        assert_eq!(
            evaluate(&run, Some(&policy), at(1_000)),
            Expiry::Unconstrained
        );
        assert_eq!(evaluate(&run, None, at(1_000)), Expiry::Unconstrained);
    }

    #[test]
    fn test_pending_run_is_unconstrained() {
        let run = BuildRun::new("ci", "app-1", "app");
        let policy = ttl_policy(Some(1), Some(1));
        assert_eq!(
            evaluate(&run, Some(&policy), at(1_000)),
            Expiry::Unconstrained
        );
    }

    #[test]
    fn test_remaining_keeps_subsecond_precision() {
        let run = completed(TerminalOutcome::Succeeded, 0);
        let policy = ttl_policy(Some(10), None);
        let now = at(4) + TimeDelta::milliseconds(250);
        assert_eq!(
            evaluate(&run, Some(&policy), now).requeue_after(),
            Some(Duration::from_millis(5_750))
        );
    }
}
