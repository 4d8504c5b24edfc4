use igmirror_core::{SyncJob, TaskOutcome};

use crate::context::SyncContext;
use crate::subsystems::tasks;

/// Run one attempt of `job`.
pub async fn handle_job(ctx: &SyncContext, job: &SyncJob, attempt: u32) -> TaskOutcome {
    match *job {
        SyncJob::UpdateProfile { profile_id } => {
            tasks::update_profile_task(ctx, profile_id, attempt).await
        }
        SyncJob::UpdateStories { profile_id } => {
            tasks::update_stories_task(ctx, profile_id, attempt).await
        }
        SyncJob::RefreshAvatar { profile_id } => {
            tasks::refresh_avatar_task(ctx, profile_id, attempt).await
        }
    }
}
