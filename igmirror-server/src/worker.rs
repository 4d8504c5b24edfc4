//! Worker pool draining the sync job queue.

use igmirror_core::config::WorkerConfig;
use igmirror_core::queue::JobBroker;
use igmirror_core::{MirrorError, TaskOutcome};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Duration;

use crate::context::SyncContext;
use crate::router;

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Idle,
    Finished,
    Rescheduled,
}

/// Claim one due job, run it, and persist the outcome.
///
/// If persisting fails the job stays `running` until its lease runs out and
/// a later poll picks it up again.
pub async fn process_next(ctx: &SyncContext, broker: &dyn JobBroker) -> Result<Poll, MirrorError> {
    let Some(claimed) = broker.claim().await? else {
        return Ok(Poll::Idle);
    };

    if claimed.reclaimed {
        tracing::warn!(
            job_id = %claimed.id,
            task = claimed.job.task_name(),
            attempt = claimed.attempt,
            "Lease expired on a running job, running it again"
        );
    } else {
        tracing::debug!(
            job_id = %claimed.id,
            task = claimed.job.task_name(),
            attempt = claimed.attempt,
            "Job claimed"
        );
    }

    match router::handle_job(ctx, &claimed.job, claimed.attempt).await {
        TaskOutcome::Done(report) => {
            broker.finish(claimed.id, &report).await?;
            tracing::info!(
                job_id = %claimed.id,
                task = claimed.job.task_name(),
                success = report.success,
                attempts = report.attempts,
                "Job finished"
            );
            Ok(Poll::Finished)
        }
        TaskOutcome::Retry {
            delay,
            attempt,
            reason,
        } => {
            broker
                .reschedule(claimed.id, attempt, delay, &reason)
                .await?;
            Ok(Poll::Rescheduled)
        }
    }
}

/// Spawn `concurrency` workers and wait for all of them to stop.
pub async fn run_worker_pool(
    ctx: SyncContext,
    broker: Arc<dyn JobBroker>,
    config: WorkerConfig,
    shutdown: broadcast::Sender<()>,
) {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let workers = config.concurrency.max(1);
    tracing::info!(workers, poll_ms = config.poll_interval_ms, "Worker pool started");

    let handles: Vec<_> = (0..workers)
        .map(|n| {
            let ctx = ctx.clone();
            let broker = broker.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    // A claimed job always runs to completion; stop only between jobs.
                    if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                    let idle = match process_next(&ctx, broker.as_ref()).await {
                        Ok(Poll::Idle) => true,
                        Ok(_) => false,
                        Err(e) => {
                            tracing::warn!(worker = n, error = %e, "Worker poll failed");
                            true
                        }
                    };
                    if idle {
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            _ = stop.recv() => break,
                        }
                    }
                }
                tracing::debug!(worker = n, "Worker stopped");
            })
        })
        .collect();

    futures::future::join_all(handles).await;
    tracing::info!("Worker pool shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use igmirror_core::queue::JobQueue;
    use igmirror_core::testing::{
        MemoryAssets, MemoryBroker, MemoryJobState, MemoryRequestLog, MemorySettings, MemoryStore,
    };
    use igmirror_core::SyncJob;
    use uuid::Uuid;

    fn context(broker: Arc<MemoryBroker>) -> SyncContext {
        SyncContext {
            profiles: Arc::new(MemoryStore::default()),
            settings: Arc::new(MemorySettings::default()),
            request_log: Arc::new(MemoryRequestLog::default()),
            assets: Arc::new(MemoryAssets::default()),
            queue: broker,
            http: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn test_running_job_is_not_handed_out_twice_within_lease() {
        let broker = MemoryBroker::default();
        let job = SyncJob::UpdateProfile {
            profile_id: Uuid::new_v4(),
        };
        broker.enqueue(&job).await.unwrap();

        let first = broker.claim().await.unwrap().unwrap();
        assert!(!first.reclaimed);
        assert!(broker.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_job_is_reclaimed_and_settled() {
        let broker = Arc::new(MemoryBroker::with_lease(Duration::ZERO));
        let ctx = context(broker.clone());
        let id = broker
            .enqueue(&SyncJob::UpdateProfile {
                profile_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        // A worker claims the job and dies before settling it.
        let abandoned = broker.claim().await.unwrap().unwrap();
        assert_eq!(abandoned.id, id);
        assert_eq!(broker.job(id).unwrap().state, MemoryJobState::Running);

        let poll = process_next(&ctx, broker.as_ref()).await.unwrap();
        assert_eq!(poll, Poll::Finished);

        let job = broker.job(id).unwrap();
        match job.state {
            MemoryJobState::Finished(report) => {
                assert!(!report.success);
                assert_eq!(report.error.as_deref(), Some("User not found"));
            }
            other => panic!("expected finished job, got {other:?}"),
        }
        assert_eq!(job.attempt, 1);
    }

    #[tokio::test]
    async fn test_reclaim_reports_the_same_attempt() {
        let broker = MemoryBroker::with_lease(Duration::ZERO);
        let id = broker
            .enqueue(&SyncJob::UpdateStories {
                profile_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        broker.claim().await.unwrap().unwrap();
        let again = broker.claim().await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert!(again.reclaimed);
        assert_eq!(again.attempt, 1);
    }
}
