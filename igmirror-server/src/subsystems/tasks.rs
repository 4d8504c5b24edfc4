//! Task layer: runs one job attempt and decides between a terminal report and
//! a delayed retry.
//!
//! A failure is retried when it is transient: transport errors, a 502/503/504
//! answer, asset storage I/O errors, or a provider failure message carrying
//! one of [`TRANSIENT_INDICATORS`]. Configuration errors never are. Up to [`MAX_RETRIES`] retries run, with
//! delays of 60 s, 120 s and 240 s; the run after that reports
//! `"Max retries exceeded: …"`.

use igmirror_core::models::update_log::{UPDATE_STATUS_FAILED, UPDATE_STATUS_SUCCESS};
use igmirror_core::{ApiError, JobReport, MirrorError, TaskOutcome};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use uuid::Uuid;

use super::{avatar, profile_sync, stories, SyncError};
use crate::context::SyncContext;

pub const MAX_RETRIES: u32 = 3;

pub const TRANSIENT_INDICATORS: &[&str] = &[
    "network",
    "timeout",
    "connection",
    "502",
    "503",
    "504",
    "temporary",
    "rate limit",
    "api error",
];

fn transient_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternatives: Vec<String> = TRANSIENT_INDICATORS
            .iter()
            .map(|s| regex::escape(s))
            .collect();
        RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .expect("transient indicator pattern is valid")
    })
}

pub fn is_transient_message(message: &str) -> bool {
    transient_pattern().is_match(message)
}

/// Gateway answers worth another try. Any other status is final.
pub const TRANSIENT_STATUSES: &[u16] = &[502, 503, 504];

pub fn is_retryable(err: &SyncError) -> bool {
    match err {
        SyncError::Api(api) if api.is_transport() => true,
        SyncError::Api(ApiError::Status { status, .. }) => TRANSIENT_STATUSES.contains(status),
        SyncError::Api(_) => false,
        SyncError::Storage(_) => true,
        SyncError::RemoteData(message) => is_transient_message(message),
        SyncError::NotFound => false,
        SyncError::Store(MirrorError::Database(db)) => {
            matches!(db, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
        }
        SyncError::Store(_) => false,
    }
}

/// Delays between attempts: 60 s, 120 s, 240 s.
pub fn retry_schedule() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(30_000)
        .take(MAX_RETRIES as usize)
}

/// Delay before retry number `retry_index` (0-based).
pub fn retry_delay(retry_index: u32) -> Option<Duration> {
    retry_schedule().nth(retry_index as usize)
}

/// Map a failed attempt to its outcome. `attempt` is 1-based.
pub fn settle_failure(task: &str, subject: &str, attempt: u32, err: &SyncError) -> TaskOutcome {
    if !is_retryable(err) {
        tracing::error!(task, subject, attempt, error = %err, "Permanent task failure");
        return TaskOutcome::Done(JobReport::err(format!("Permanent error: {err}"), attempt));
    }

    match retry_delay(attempt - 1) {
        Some(delay) => {
            tracing::warn!(
                task,
                subject,
                attempt,
                max_attempts = MAX_RETRIES + 1,
                delay_secs = delay.as_secs(),
                error = %err,
                "Retryable task failure"
            );
            TaskOutcome::Retry {
                delay,
                attempt: attempt + 1,
                reason: err.to_string(),
            }
        }
        None => {
            tracing::error!(task, subject, attempt, error = %err, "Max retries exceeded");
            TaskOutcome::Done(JobReport::err(
                format!("Max retries exceeded: {err}"),
                attempt,
            ))
        }
    }
}

// ============================================================================
// Task entry points
// ============================================================================

pub async fn update_profile_task(ctx: &SyncContext, profile_id: Uuid, attempt: u32) -> TaskOutcome {
    let subject = profile_id.to_string();
    match profile_sync::update_profile_from_api(ctx, profile_id).await {
        Ok(sync) => TaskOutcome::Done(
            JobReport::ok(
                format!("Successfully updated {} from Instagram API.", sync.profile.username),
                attempt,
            )
            .with("username", sync.profile.username.clone())
            .with("lookup", sync.lookup.as_str()),
        ),
        Err(SyncError::NotFound) => {
            tracing::error!(profile_id = %profile_id, "User not found");
            TaskOutcome::Done(JobReport::err("User not found", attempt))
        }
        Err(e) => settle_failure("update_profile", &subject, attempt, &e),
    }
}

pub async fn update_stories_task(ctx: &SyncContext, profile_id: Uuid, attempt: u32) -> TaskOutcome {
    let subject = profile_id.to_string();
    let outcome = match stories::update_stories_from_api(ctx, profile_id).await {
        Ok(sync) => TaskOutcome::Done(
            JobReport::ok(sync.message(), attempt)
                .with("username", sync.username.clone())
                .with("stories_found", sync.found)
                .with("stories_created", sync.created),
        ),
        Err(SyncError::NotFound) => {
            tracing::error!(profile_id = %profile_id, "User not found");
            return TaskOutcome::Done(JobReport::err("User not found", attempt));
        }
        Err(e) => settle_failure("update_stories", &subject, attempt, &e),
    };

    if let TaskOutcome::Done(report) = &outcome {
        record_story_update(ctx, profile_id, report).await;
    }
    outcome
}

pub async fn refresh_avatar_task(ctx: &SyncContext, profile_id: Uuid, attempt: u32) -> TaskOutcome {
    let subject = profile_id.to_string();
    match avatar::refresh_avatar(ctx, profile_id).await {
        Ok(change) => TaskOutcome::Done(avatar::report(change, attempt)),
        Err(SyncError::NotFound) => {
            tracing::error!(profile_id = %profile_id, "User not found");
            TaskOutcome::Done(JobReport::err("User not found", attempt))
        }
        Err(e) => settle_failure("refresh_avatar", &subject, attempt, &e),
    }
}

async fn record_story_update(ctx: &SyncContext, profile_id: Uuid, report: &JobReport) {
    let (status, message) = if report.success {
        (UPDATE_STATUS_SUCCESS, report.message.clone().unwrap_or_default())
    } else {
        (UPDATE_STATUS_FAILED, report.error.clone().unwrap_or_default())
    };
    if let Err(e) = ctx
        .profiles
        .append_update_log(profile_id, status, &message)
        .await
    {
        tracing::warn!(profile_id = %profile_id, error = %e, "Failed to record story update log");
    }
}
