//! In-memory implementations of the storage traits for tests.
//!
//! Enabled for this crate's unit tests and for dependents through the
//! `testing` feature.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::assets::AssetStore;
use crate::error::MirrorError;
use crate::jobs::{JobReport, SyncJob};
use crate::models::{Account, AutoUpdate, LogStatus, NewStory, Profile, RequestLog, Story, UpdateStoryLog};
use crate::queue::{ClaimedJob, JobBroker, JobQueue, JobStatus, DEFAULT_LEASE};
use crate::request_log::{
    LogCompletion, LogFailure, NewRequestLog, RequestLogReader, RequestLogSink,
};
use crate::settings::{Provider, SettingsStore};
use crate::store::{AccountStore, GoogleIdentity, ProfileStore};

// ============================================================================
// Request log
// ============================================================================

#[derive(Default)]
pub struct MemoryRequestLog {
    rows: Mutex<Vec<RequestLog>>,
}

impl MemoryRequestLog {
    pub fn rows(&self) -> Vec<RequestLog> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestLogSink for MemoryRequestLog {
    async fn begin(&self, entry: NewRequestLog) -> Result<i64, MirrorError> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        let now = Utc::now();
        rows.push(RequestLog {
            id,
            method: entry.method,
            url: entry.url,
            request_headers: entry.headers,
            request_params: entry.params,
            request_body: entry.body,
            response_status_code: None,
            response_headers: serde_json::json!({}),
            response_body: serde_json::json!({}),
            status: LogStatus::Pending,
            duration_ms: None,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn complete(&self, id: i64, completion: LogCompletion) -> Result<(), MirrorError> {
        let mut rows = self.rows.lock().unwrap();
        let row = pending_row(&mut rows, id)?;
        row.status = LogStatus::Success;
        row.response_status_code = Some(completion.status_code as i32);
        row.response_headers = completion.headers;
        row.response_body = completion.body;
        row.duration_ms = Some(completion.duration_ms);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, id: i64, failure: LogFailure) -> Result<(), MirrorError> {
        if !matches!(failure.status, LogStatus::Error | LogStatus::Timeout) {
            return Err(MirrorError::Other(format!(
                "request log cannot fail with status {}",
                failure.status
            )));
        }
        let mut rows = self.rows.lock().unwrap();
        let row = pending_row(&mut rows, id)?;
        row.status = failure.status;
        row.error_message = failure.error_message;
        row.duration_ms = Some(failure.duration_ms);
        if let Some(p) = failure.partial {
            row.response_status_code = Some(p.status_code as i32);
            row.response_headers = p.headers;
            row.response_body = p.body;
        }
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RequestLogReader for MemoryRequestLog {
    async fn list_recent(&self, limit: i64) -> Result<Vec<RequestLog>, MirrorError> {
        let mut rows = self.rows();
        rows.reverse();
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn get(&self, id: i64) -> Result<Option<RequestLog>, MirrorError> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }
}

fn pending_row(rows: &mut [RequestLog], id: i64) -> Result<&mut RequestLog, MirrorError> {
    let row = rows
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| MirrorError::NotFound(format!("request log {id}")))?;
    if row.status.is_terminal() {
        return Err(MirrorError::LogFinalized(id));
    }
    Ok(row)
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Default)]
pub struct MemorySettings {
    rows: Mutex<HashMap<Provider, Value>>,
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn load_raw(&self, provider: Provider) -> Result<Option<Value>, MirrorError> {
        Ok(self.rows.lock().unwrap().get(&provider).cloned())
    }

    async fn save_raw(&self, provider: Provider, config: &Value) -> Result<(), MirrorError> {
        self.rows.lock().unwrap().insert(provider, config.clone());
        Ok(())
    }
}

// ============================================================================
// Profiles, stories, accounts
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<Vec<Profile>>,
    stories: Mutex<Vec<Story>>,
    update_logs: Mutex<Vec<UpdateStoryLog>>,
    accounts: Mutex<Vec<Account>>,
    profile_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn insert_profile(&self, profile: Profile) {
        self.profiles.lock().unwrap().push(profile);
    }

    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        self.profiles.lock().unwrap().iter().find(|p| p.id == id).cloned()
    }

    pub fn stories(&self) -> Vec<Story> {
        self.stories.lock().unwrap().clone()
    }

    pub fn update_logs(&self) -> Vec<UpdateStoryLog> {
        self.update_logs.lock().unwrap().clone()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.lock().unwrap().clone()
    }

    /// Number of `save_profile` and `set_avatar_path` calls so far.
    pub fn profile_writes(&self) -> usize {
        self.profile_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, MirrorError> {
        Ok(self.profile(id))
    }

    async fn save_profile(&self, profile: &Profile) -> Result<(), MirrorError> {
        let mut profiles = self.profiles.lock().unwrap();
        let owned_elsewhere = profiles.iter().any(|p| {
            p.id != profile.id
                && (p.username == profile.username
                    || (profile.instagram_id.is_some() && p.instagram_id == profile.instagram_id))
        });
        if owned_elsewhere {
            return Err(MirrorError::Conflict(format!(
                "profile {} (username {}, instagram_id {})",
                profile.id,
                profile.username,
                profile.instagram_id.as_deref().unwrap_or("-")
            )));
        }
        self.profile_writes.fetch_add(1, Ordering::SeqCst);
        let slot = profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| MirrorError::NotFound(format!("profile {}", profile.id)))?;
        *slot = profile.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn set_avatar_path(&self, id: Uuid, path: &str) -> Result<(), MirrorError> {
        self.profile_writes.fetch_add(1, Ordering::SeqCst);
        let mut profiles = self.profiles.lock().unwrap();
        let slot = profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| MirrorError::NotFound(format!("profile {id}")))?;
        slot.profile_picture = Some(path.to_string());
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn list_auto_update(&self, kind: AutoUpdate) -> Result<Vec<Profile>, MirrorError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| match kind {
                AutoUpdate::Profile => p.allow_auto_update_profile,
                AutoUpdate::Stories => p.allow_auto_update_stories,
            })
            .cloned()
            .collect())
    }

    async fn get_or_create_profile(&self, username: &str) -> Result<(Profile, bool), MirrorError> {
        let mut profiles = self.profiles.lock().unwrap();
        if let Some(p) = profiles.iter().find(|p| p.username == username) {
            return Ok((p.clone(), false));
        }
        let p = Profile::new(username);
        profiles.push(p.clone());
        Ok((p, true))
    }

    async fn get_or_create_story(&self, story: NewStory) -> Result<(Story, bool), MirrorError> {
        let mut stories = self.stories.lock().unwrap();
        if let Some(s) = stories.iter().find(|s| s.story_id == story.story_id) {
            return Ok((s.clone(), false));
        }
        let s = Story {
            id: Uuid::new_v4(),
            story_id: story.story_id,
            user_id: story.user_id,
            thumbnail_url: story.thumbnail_url,
            media_url: story.media_url,
            thumbnail: None,
            media: None,
            story_created_at: story.story_created_at,
            created_at: Utc::now(),
        };
        stories.push(s.clone());
        Ok((s, true))
    }

    async fn set_story_local_media(
        &self,
        story_id: Uuid,
        thumbnail: Option<&str>,
        media: Option<&str>,
    ) -> Result<(), MirrorError> {
        let mut stories = self.stories.lock().unwrap();
        if let Some(s) = stories.iter_mut().find(|s| s.id == story_id) {
            if let Some(t) = thumbnail {
                s.thumbnail = Some(t.to_string());
            }
            if let Some(m) = media {
                s.media = Some(m.to_string());
            }
        }
        Ok(())
    }

    async fn append_update_log(
        &self,
        user_id: Uuid,
        status: &str,
        message: &str,
    ) -> Result<UpdateStoryLog, MirrorError> {
        let mut logs = self.update_logs.lock().unwrap();
        let now = Utc::now();
        let row = UpdateStoryLog {
            id: logs.len() as i64 + 1,
            user_id,
            status: status.to_string(),
            message: message.to_string(),
            created_at: now,
            updated_at: now,
        };
        logs.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn upsert_google_account(
        &self,
        identity: &GoogleIdentity,
    ) -> Result<Account, MirrorError> {
        let mut accounts = self.accounts.lock().unwrap();
        let now = Utc::now();
        if let Some(a) = accounts.iter_mut().find(|a| a.email == identity.email) {
            a.name = identity.name.clone();
            a.photo_url = identity.photo_url.clone();
            a.is_active = true;
            a.updated_at = now;
            return Ok(a.clone());
        }
        let account = Account {
            id: Uuid::new_v4(),
            email: identity.email.clone(),
            username: identity.email.clone(),
            name: identity.name.clone(),
            photo_url: identity.photo_url.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        accounts.push(account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, MirrorError> {
        Ok(self.accounts.lock().unwrap().iter().find(|a| a.id == id).cloned())
    }
}

// ============================================================================
// Assets
// ============================================================================

#[derive(Default)]
pub struct MemoryAssets {
    files: Mutex<HashMap<String, Bytes>>,
    writes: AtomicUsize,
    fail_writes: Mutex<bool>,
}

impl MemoryAssets {
    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        self.files.lock().unwrap().insert(path.to_string(), data.into());
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following `write` fail with an I/O error.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }
}

#[async_trait]
impl AssetStore for MemoryAssets {
    async fn read(&self, path: &str) -> io::Result<Bytes> {
        self.get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    async fn write(&self, path: &str, data: Bytes) -> io::Result<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put(path, data);
        Ok(())
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryJobState {
    Queued,
    Running,
    Finished(JobReport),
}

#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub id: Uuid,
    pub job: SyncJob,
    pub attempt: u32,
    pub state: MemoryJobState,
    pub due: Instant,
    /// Delays passed to `reschedule`, in order.
    pub delays: Vec<Duration>,
    pub last_error: String,
    /// When the current run was claimed.
    pub claimed_at: Option<Instant>,
}

pub struct MemoryBroker {
    jobs: Mutex<Vec<MemoryJob>>,
    reject: Mutex<HashSet<Uuid>>,
    lease: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            jobs: Mutex::default(),
            reject: Mutex::default(),
            lease: DEFAULT_LEASE,
        }
    }
}

impl MemoryBroker {
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            lease,
            ..Self::default()
        }
    }

    /// Make `enqueue` fail for jobs targeting `profile_id`.
    pub fn reject_profile(&self, profile_id: Uuid) {
        self.reject.lock().unwrap().insert(profile_id);
    }

    pub fn jobs(&self) -> Vec<MemoryJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn job(&self, id: Uuid) -> Option<MemoryJob> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    /// Skip every pending retry delay.
    pub fn make_all_due(&self) {
        let now = Instant::now();
        for j in self.jobs.lock().unwrap().iter_mut() {
            j.due = now;
        }
    }
}

#[async_trait]
impl JobQueue for MemoryBroker {
    async fn enqueue(&self, job: &SyncJob) -> Result<Uuid, MirrorError> {
        if self.reject.lock().unwrap().contains(&job.profile_id()) {
            return Err(MirrorError::Other("broker unavailable".into()));
        }
        let id = Uuid::new_v4();
        self.jobs.lock().unwrap().push(MemoryJob {
            id,
            job: job.clone(),
            attempt: 1,
            state: MemoryJobState::Queued,
            due: Instant::now(),
            delays: Vec::new(),
            last_error: String::new(),
            claimed_at: None,
        });
        Ok(id)
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobStatus>, MirrorError> {
        let now = Utc::now();
        Ok(self.job(id).map(|j| {
            let (status, result) = match &j.state {
                MemoryJobState::Queued => ("queued", None),
                MemoryJobState::Running => ("running", None),
                MemoryJobState::Finished(r) if r.success => ("succeeded", Some(r.to_json())),
                MemoryJobState::Finished(r) => ("failed", Some(r.to_json())),
            };
            JobStatus {
                id: j.id,
                task: j.job.task_name().to_string(),
                status: status.to_string(),
                attempt: j.attempt as i32,
                result,
                last_error: j.last_error,
                run_at: now,
                updated_at: now,
            }
        }))
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn claim(&self) -> Result<Option<ClaimedJob>, MirrorError> {
        let now = Instant::now();
        let lease = self.lease;
        let mut jobs = self.jobs.lock().unwrap();
        let Some(j) = jobs.iter_mut().find(|j| match j.state {
            MemoryJobState::Queued => j.due <= now,
            MemoryJobState::Running => j.claimed_at.is_some_and(|at| at + lease <= now),
            MemoryJobState::Finished(_) => false,
        }) else {
            return Ok(None);
        };
        let reclaimed = j.state == MemoryJobState::Running;
        j.state = MemoryJobState::Running;
        j.claimed_at = Some(now);
        Ok(Some(ClaimedJob {
            id: j.id,
            job: j.job.clone(),
            attempt: j.attempt,
            reclaimed,
        }))
    }

    async fn finish(&self, id: Uuid, report: &JobReport) -> Result<(), MirrorError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(j) = jobs.iter_mut().find(|j| j.id == id) {
            if let Some(e) = &report.error {
                j.last_error = e.clone();
            }
            j.state = MemoryJobState::Finished(report.clone());
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempt: u32,
        delay: Duration,
        reason: &str,
    ) -> Result<(), MirrorError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(j) = jobs.iter_mut().find(|j| j.id == id) {
            j.state = MemoryJobState::Queued;
            j.attempt = attempt;
            j.due = Instant::now() + delay;
            j.delays.push(delay);
            j.last_error = reason.to_string();
        }
        Ok(())
    }
}
