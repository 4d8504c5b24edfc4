//! Periodic fan-out of per-profile sync jobs.
//!
//! Each run enumerates the profiles with the matching auto-update toggle and
//! enqueues one job per profile. A failed enqueue is counted and logged; it
//! never stops the rest of the batch.

use igmirror_core::config::SchedulerConfig;
use igmirror_core::models::{AutoUpdate, Profile};
use igmirror_core::queue::JobQueue;
use igmirror_core::store::ProfileStore;
use igmirror_core::{MirrorError, SyncJob};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchReport {
    pub queued: usize,
    pub errors: usize,
    pub task_ids: Vec<Uuid>,
}

pub async fn queue_profile_updates(
    store: &dyn ProfileStore,
    queue: &dyn JobQueue,
) -> Result<BatchReport, MirrorError> {
    fan_out(store, queue, AutoUpdate::Profile, |p| SyncJob::UpdateProfile {
        profile_id: p.id,
    })
    .await
}

pub async fn queue_story_updates(
    store: &dyn ProfileStore,
    queue: &dyn JobQueue,
) -> Result<BatchReport, MirrorError> {
    fan_out(store, queue, AutoUpdate::Stories, |p| SyncJob::UpdateStories {
        profile_id: p.id,
    })
    .await
}

async fn fan_out(
    store: &dyn ProfileStore,
    queue: &dyn JobQueue,
    kind: AutoUpdate,
    make_job: impl Fn(&Profile) -> SyncJob,
) -> Result<BatchReport, MirrorError> {
    let profiles = store.list_auto_update(kind).await?;
    let mut report = BatchReport::default();

    for profile in &profiles {
        let job = make_job(profile);
        match queue.enqueue(&job).await {
            Ok(id) => {
                report.queued += 1;
                report.task_ids.push(id);
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(
                    username = %profile.username,
                    task = job.task_name(),
                    error = %e,
                    "Failed to queue job"
                );
            }
        }
    }

    tracing::info!(
        kind = ?kind,
        eligible = profiles.len(),
        queued = report.queued,
        errors = report.errors,
        "Batch fan-out complete"
    );
    Ok(report)
}

/// Run both fan-outs on their own intervals until shutdown.
pub async fn run_scheduler_loop(
    store: Arc<dyn ProfileStore>,
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    if !config.enabled {
        tracing::info!("Scheduler disabled via config");
        return;
    }

    let mut profile_ticker = interval(Duration::from_secs(config.profile_interval_minutes.max(1) * 60));
    profile_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stories_ticker = interval(Duration::from_secs(config.stories_interval_minutes.max(1) * 60));
    stories_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        profile_interval_min = config.profile_interval_minutes,
        stories_interval_min = config.stories_interval_minutes,
        "Scheduler started"
    );

    loop {
        tokio::select! {
            _ = profile_ticker.tick() => {
                if let Err(e) = queue_profile_updates(store.as_ref(), queue.as_ref()).await {
                    tracing::warn!(error = %e, "Profile fan-out failed");
                }
            }
            _ = stories_ticker.tick() => {
                if let Err(e) = queue_story_updates(store.as_ref(), queue.as_ref()).await {
                    tracing::warn!(error = %e, "Story fan-out failed");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Scheduler shutting down...");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igmirror_core::testing::{MemoryBroker, MemoryStore};

    fn eligible(name: &str) -> Profile {
        let mut p = Profile::new(name);
        p.allow_auto_update_profile = true;
        p.allow_auto_update_stories = true;
        p
    }

    #[tokio::test]
    async fn test_fan_out_isolates_enqueue_failures() {
        let store = MemoryStore::default();
        let broker = MemoryBroker::default();

        let mut third = None;
        for i in 1..=5 {
            let p = eligible(&format!("user{i}"));
            if i == 3 {
                third = Some(p.id);
            }
            store.insert_profile(p);
        }
        broker.reject_profile(third.unwrap());

        let report = queue_profile_updates(&store, &broker).await.unwrap();
        assert_eq!(report.queued, 4);
        assert_eq!(report.errors, 1);
        assert_eq!(report.task_ids.len(), 4);
        assert_eq!(broker.jobs().len(), 4);
    }

    #[tokio::test]
    async fn test_only_flagged_profiles_are_queued() {
        let store = MemoryStore::default();
        let broker = MemoryBroker::default();

        let mut stories_only = Profile::new("stories_only");
        stories_only.allow_auto_update_stories = true;
        store.insert_profile(stories_only.clone());
        store.insert_profile(Profile::new("neither"));

        let profiles = queue_profile_updates(&store, &broker).await.unwrap();
        assert_eq!(profiles.queued, 0);

        let stories = queue_story_updates(&store, &broker).await.unwrap();
        assert_eq!(stories.queued, 1);
        assert_eq!(
            broker.jobs()[0].job,
            SyncJob::UpdateStories {
                profile_id: stories_only.id
            }
        );
    }
}
