//! Long-running retention controller.
//!
//! The controller consumes [`WatchEvent`]s, turns admitted events into
//! reconcile requests on a [`WorkQueue`], and runs
//! `controller.max_concurrent_reconciles` workers that drain the queue.
//! Requeue-after results are re-added with their delay, retryable failures
//! back off exponentially, and non-retryable failures are dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    error::ReconcileError, filter::WatchEvent, queue::WorkQueue, reconciler::RetentionReconciler,
};
use crate::config::ControllerConfig;

pub struct RetentionController {
    reconciler: Arc<RetentionReconciler>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl RetentionController {
    pub fn new(reconciler: Arc<RetentionReconciler>, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new(config.clone())),
            config,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Queue the requests for `event` if the filter admits it.
    pub fn enqueue(&self, event: &WatchEvent) -> bool {
        let requests = event.requests();
        let admitted = !requests.is_empty();
        for request in requests {
            self.queue.add(request);
        }
        admitted
    }

    /// Run until `shutdown` fires.
    ///
    /// In-flight reconciles are cancelled on shutdown and the call returns
    /// once every worker has stopped. A closed event channel stops intake but
    /// not the workers, so pending requeues still run.
    pub async fn run(self, mut events: mpsc::Receiver<WatchEvent>, shutdown: CancellationToken) {
        let workers = self.config.max_concurrent_reconciles;
        tracing::info!(
            workers,
            reconcile_timeout_secs = self.config.reconcile_timeout_secs,
            "Starting retention controller"
        );

        let tracker = TaskTracker::new();
        for worker_id in 0..workers {
            let queue = self.queue.clone();
            let reconciler = self.reconciler.clone();
            let cancel = shutdown.clone();
            tracker.spawn(async move {
                while process_next(&queue, &reconciler, &cancel).await {}
                tracing::debug!(worker_id, "Retention worker stopped");
            });
        }
        tracker.close();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.enqueue(&event);
                    }
                    None => {
                        tracing::info!("Watch stream closed, waiting for shutdown");
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }

        tracing::info!("Shutdown signal received, stopping retention workers");
        self.queue.shutdown();
        tracker.wait().await;
        tracing::info!("Retention controller stopped");
    }
}

/// Handle one request from the queue. Returns `false` once the queue is
/// shut down.
async fn process_next(
    queue: &WorkQueue,
    reconciler: &RetentionReconciler,
    cancel: &CancellationToken,
) -> bool {
    let Some(request) = queue.get().await else {
        return false;
    };

    match reconciler.reconcile(&request, cancel).await {
        Ok(outcome) => {
            queue.forget(&request);
            if let Some(after) = outcome.requeue_after {
                tracing::debug!(
                    request = %request,
                    requeue_after_ms = after.as_millis() as u64,
                    "Requeueing"
                );
                queue.add_after(request.clone(), after);
            }
        }
        Err(ReconcileError::Cancelled) if cancel.is_cancelled() => {
            tracing::debug!(request = %request, "Reconcile cancelled by shutdown");
        }
        Err(e) if e.is_retryable() => {
            let retry_in = queue.add_rate_limited(request.clone());
            tracing::error!(
                request = %request,
                error = %e,
                error_kind = e.kind(),
                attempts = queue.num_requeues(&request),
                retry_in_ms = retry_in.as_millis() as u64,
                "Reconcile failed, retrying"
            );
        }
        Err(e) => {
            queue.forget(&request);
            tracing::error!(
                request = %request,
                error = %e,
                error_kind = e.kind(),
                "Reconcile failed, not retrying"
            );
        }
    }

    queue.done(&request);
    true
}
