//! Background execution of recomputation and persistence jobs.
//!
//! Jobs are submitted without waiting; each runs in its own task with
//! retries on recoverable errors. A job that keeps failing is logged and
//! dropped, never reported back to the request that queued it.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::{
    config::RetryPolicy,
    error::AppResult,
    models::{ItemId, RecommendationImpression, UserId},
};

/// Work that runs off the request path
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Recompute similarity between the user and every active user
    RecomputeUser(UserId),
    /// Recompute similarity between the item and every active item
    RecomputeItem(ItemId),
    RecordImpressions(Vec<RecommendationImpression>),
}

impl Job {
    pub fn label(&self) -> &'static str {
        match self {
            Job::RecomputeUser(_) => "recompute_user",
            Job::RecomputeItem(_) => "recompute_item",
            Job::RecordImpressions(_) => "record_impressions",
        }
    }
}

/// Executes a single job
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> AppResult<()>;
}

struct QueuedJob {
    id: Uuid,
    job: Job,
}

/// Submission side of the background worker
#[derive(Clone)]
pub struct RecomputeWorker {
    job_tx: mpsc::UnboundedSender<QueuedJob>,
}

/// Handle for gracefully shutting down the worker
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops accepting jobs and waits for queued and running ones to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Worker shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Worker dispatch task panicked");
        }
    }
}

impl RecomputeWorker {
    /// Spawns the dispatch loop
    pub fn start(runner: Arc<dyn JobRunner>, policy: RetryPolicy) -> (Self, WorkerHandle) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            Self::dispatch_loop(runner, policy, job_rx, shutdown_rx).await;
        });

        (Self { job_tx }, WorkerHandle { shutdown_tx, task })
    }

    /// Queues a job and returns its id without waiting for it to run
    pub fn submit(&self, job: Job) -> Uuid {
        let id = Uuid::new_v4();
        let label = job.label();

        if self.job_tx.send(QueuedJob { id, job }).is_err() {
            tracing::error!(job_id = %id, job = label, "Worker is shut down, job dropped");
        } else {
            tracing::debug!(job_id = %id, job = label, "Job queued");
        }

        id
    }

    async fn dispatch_loop(
        runner: Arc<dyn JobRunner>,
        policy: RetryPolicy,
        mut job_rx: mpsc::UnboundedReceiver<QueuedJob>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Worker dispatch task started");
        let mut in_flight: JoinSet<bool> = JoinSet::new();

        loop {
            tokio::select! {
                Some(queued) = job_rx.recv() => {
                    in_flight.spawn(Self::run_with_retry(runner.clone(), policy, queued));
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Background job panicked");
                    }
                }
                Some(()) = shutdown_rx.recv() => {
                    job_rx.close();
                    while let Some(queued) = job_rx.recv().await {
                        in_flight.spawn(Self::run_with_retry(runner.clone(), policy, queued));
                    }

                    let mut failed = 0usize;
                    while let Some(joined) = in_flight.join_next().await {
                        if !matches!(joined, Ok(true)) {
                            failed += 1;
                        }
                    }

                    tracing::info!(failed, "Worker dispatch task stopped");
                    break;
                }
                else => {
                    tracing::info!("Worker dispatch task stopped, all handles dropped");
                    break;
                }
            }
        }
    }

    /// Runs the job, retrying recoverable failures with exponential backoff.
    /// Returns whether the job eventually succeeded.
    async fn run_with_retry(
        runner: Arc<dyn JobRunner>,
        policy: RetryPolicy,
        queued: QueuedJob,
    ) -> bool {
        let QueuedJob { id, job } = queued;

        for attempt in 1..=policy.max_attempts {
            match runner.run(&job).await {
                Ok(()) => {
                    tracing::debug!(job_id = %id, job = job.label(), attempt, "Job completed");
                    return true;
                }
                Err(e) if e.is_recoverable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        job_id = %id,
                        job = job.label(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %id,
                        job = job.label(),
                        attempt,
                        error = %e,
                        "Job failed, giving up"
                    );
                    return false;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    mock! {
        Runner {}
        #[async_trait]
        impl JobRunner for Runner {
            async fn run(&self, job: &Job) -> AppResult<()>;
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    /// Runner that records every job it is handed
    #[derive(Default)]
    struct RecordingRunner {
        seen: std::sync::Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, job: &Job) -> AppResult<()> {
            self.seen.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn counting_mock(
        calls: &Arc<AtomicUsize>,
        result: impl Fn(usize) -> AppResult<()> + Send + 'static,
    ) -> MockRunner {
        let counter = calls.clone();
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .returning(move |_| result(counter.fetch_add(1, Ordering::SeqCst)));
        runner
    }

    #[tokio::test]
    async fn test_jobs_run_before_shutdown_completes() {
        let runner = Arc::new(RecordingRunner::default());
        let (worker, handle) = RecomputeWorker::start(runner.clone(), fast_policy(3));

        worker.submit(Job::RecomputeUser(UserId(1)));
        worker.submit(Job::RecomputeItem(ItemId(2)));
        handle.shutdown().await;

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&Job::RecomputeUser(UserId(1))));
        assert!(seen.contains(&Job::RecomputeItem(ItemId(2))));
    }

    #[tokio::test]
    async fn test_recoverable_failures_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = counting_mock(&calls, |call| {
            if call < 2 {
                Err(AppError::StoreUnavailable(sqlx::Error::PoolTimedOut))
            } else {
                Ok(())
            }
        });

        let (worker, handle) = RecomputeWorker::start(Arc::new(runner), fast_policy(3));
        worker.submit(Job::RecomputeUser(UserId(1)));
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_swallowed_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = counting_mock(&calls, |_| {
            Err(AppError::StoreUnavailable(sqlx::Error::PoolClosed))
        });

        let (worker, handle) = RecomputeWorker::start(Arc::new(runner), fast_policy(2));
        worker.submit(Job::RecomputeItem(ItemId(5)));
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_recoverable_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = counting_mock(&calls, |_| {
            Err(AppError::Internal("corrupt row".to_string()))
        });

        let (worker, handle) = RecomputeWorker::start(Arc::new(runner), fast_policy(5));
        worker.submit(Job::RecordImpressions(Vec::new()));
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_does_not_panic() {
        let runner = Arc::new(RecordingRunner::default());
        let (worker, handle) = RecomputeWorker::start(runner.clone(), fast_policy(1));
        handle.shutdown().await;

        worker.submit(Job::RecomputeUser(UserId(9)));
        assert!(runner.seen.lock().unwrap().is_empty());
    }
}
