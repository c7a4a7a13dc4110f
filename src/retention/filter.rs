//! Which change events trigger a reconcile.

use super::reconciler::ReconcileRequest;
use crate::models::{Build, BuildRun, ObjectKey};

/// A change to a single object.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Created(T),
    Updated { old: T, new: T },
    Deleted(T),
}

impl<T> ChangeEvent<T> {
    /// The object as it is after the change (or was, for deletions).
    pub fn object(&self) -> &T {
        match self {
            ChangeEvent::Created(obj) | ChangeEvent::Deleted(obj) => obj,
            ChangeEvent::Updated { new, .. } => new,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            ChangeEvent::Created(_) => "created",
            ChangeEvent::Updated { .. } => "updated",
            ChangeEvent::Deleted(_) => "deleted",
        }
    }
}

/// An event from the watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Build(ChangeEvent<Build>),
    BuildRun(ChangeEvent<BuildRun>),
}

impl WatchEvent {
    /// Whether this event can change what retention should delete.
    pub fn admits(&self) -> bool {
        match self {
            WatchEvent::Build(event) => admits_build(event),
            WatchEvent::BuildRun(event) => admits_build_run(event),
        }
    }

    /// The reconcile requests for this event, empty if it is not admitted.
    ///
    /// A run event queues the run itself (TTL) and its owning build, since a
    /// run completing can push the build over a count limit.
    pub fn requests(&self) -> Vec<ReconcileRequest> {
        let admitted = self.admits();
        let (requests, action) = match self {
            WatchEvent::Build(event) => (
                vec![ReconcileRequest::build(event.object().key())],
                event.action(),
            ),
            WatchEvent::BuildRun(event) => {
                let run = event.object();
                (
                    vec![
                        ReconcileRequest::build_run(run.key()),
                        ReconcileRequest::build(ObjectKey::new(&run.namespace, &run.build_name)),
                    ],
                    event.action(),
                )
            }
        };

        tracing::trace!(
            request = %requests[0],
            action,
            admitted,
            "Filtered watch event"
        );
        if admitted { requests } else { Vec::new() }
    }
}

/// Builds matter when they appear or their retention policy changes.
/// Edits to anything else on the build do not affect which runs to keep.
pub fn admits_build(event: &ChangeEvent<Build>) -> bool {
    match event {
        ChangeEvent::Created(_) => true,
        ChangeEvent::Updated { old, new } => old.retention != new.retention,
        ChangeEvent::Deleted(_) => false,
    }
}

/// Every run creation and update is reconciled, since completing a run is an
/// update. Deleted runs need no retention.
pub fn admits_build_run(event: &ChangeEvent<BuildRun>) -> bool {
    !matches!(event, ChangeEvent::Deleted(_))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{RetentionPolicy, TerminalOutcome};

    fn build(limit: Option<u32>) -> Build {
        Build::new("ci", "app").with_retention(RetentionPolicy {
            succeeded_limit: limit,
            ..Default::default()
        })
    }

    #[test]
    fn test_build_creation_admitted() {
        assert!(admits_build(&ChangeEvent::Created(build(Some(3)))));
    }

    #[test]
    fn test_build_deletion_rejected() {
        assert!(!admits_build(&ChangeEvent::Deleted(build(Some(3)))));
    }

    #[test]
    fn test_build_update_admitted_only_on_policy_change() {
        let unchanged = ChangeEvent::Updated {
            old: build(Some(3)),
            new: build(Some(3)),
        };
        assert!(!admits_build(&unchanged));

        let changed = ChangeEvent::Updated {
            old: build(Some(3)),
            new: build(Some(2)),
        };
        assert!(admits_build(&changed));

        let removed = ChangeEvent::Updated {
            old: build(Some(3)),
            new: Build::new("ci", "app"),
        };
        assert!(admits_build(&removed));
    }

    #[test]
    fn test_build_run_events() {
        let pending = BuildRun::new("ci", "app-1", "app");
        let mut finished = pending.clone();
        finished.complete(
            TerminalOutcome::Succeeded,
            Utc.timestamp_opt(10, 0).unwrap(),
            None,
        );

        assert!(admits_build_run(&ChangeEvent::Created(pending.clone())));
        assert!(admits_build_run(&ChangeEvent::Updated {
            old: pending.clone(),
            new: finished.clone(),
        }));
        assert!(admits_build_run(&ChangeEvent::Updated {
            old: finished.clone(),
            new: finished.clone(),
        }));
        assert!(!admits_build_run(&ChangeEvent::Deleted(finished)));
    }

    #[test]
    fn test_requests_for_admitted_events() {
        let event = WatchEvent::BuildRun(ChangeEvent::Created(BuildRun::new("ci", "app-1", "app")));
        assert_eq!(
            event.requests(),
            vec![
                ReconcileRequest::build_run(ObjectKey::new("ci", "app-1")),
                ReconcileRequest::build(ObjectKey::new("ci", "app")),
            ]
        );

        let event = WatchEvent::Build(ChangeEvent::Updated {
            old: build(Some(1)),
            new: build(Some(2)),
        });
        assert_eq!(
            event.requests(),
            vec![ReconcileRequest::build(ObjectKey::new("ci", "app"))]
        );

        let event = WatchEvent::Build(ChangeEvent::Deleted(build(Some(1))));
        assert!(event.requests().is_empty());

        let event = WatchEvent::BuildRun(ChangeEvent::Deleted(BuildRun::new("ci", "app-1", "app")));
        assert!(event.requests().is_empty());
    }
}
