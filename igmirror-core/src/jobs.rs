use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Message put on the sync queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum SyncJob {
    UpdateProfile { profile_id: Uuid },
    UpdateStories { profile_id: Uuid },
    RefreshAvatar { profile_id: Uuid },
}

impl SyncJob {
    pub fn task_name(&self) -> &'static str {
        match self {
            SyncJob::UpdateProfile { .. } => "update_profile",
            SyncJob::UpdateStories { .. } => "update_stories",
            SyncJob::RefreshAvatar { .. } => "refresh_avatar",
        }
    }

    pub fn profile_id(&self) -> Uuid {
        match self {
            SyncJob::UpdateProfile { profile_id }
            | SyncJob::UpdateStories { profile_id }
            | SyncJob::RefreshAvatar { profile_id } => *profile_id,
        }
    }
}

/// Terminal outcome of one task run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl JobReport {
    pub fn ok(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            attempts,
            context: Map::new(),
        }
    }

    pub fn err(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            attempts,
            context: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// What a task run asks the worker to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done(JobReport),
    /// Run the same job again after `delay`; `attempt` is the attempt number
    /// the re-run will carry.
    Retry {
        delay: Duration,
        attempt: u32,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serializes_with_task_tag() {
        let id = Uuid::new_v4();
        let job = SyncJob::UpdateStories { profile_id: id };
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["task"], "update_stories");
        assert_eq!(v["profile_id"], id.to_string());

        let back: SyncJob = serde_json::from_value(v).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.task_name(), "update_stories");
        assert_eq!(back.profile_id(), id);
    }

    #[test]
    fn test_unknown_task_is_rejected() {
        let v = serde_json::json!({"task": "delete_everything", "profile_id": Uuid::nil()});
        assert!(serde_json::from_value::<SyncJob>(v).is_err());
    }

    #[test]
    fn test_report_flattens_context() {
        let report = JobReport::ok("Avatar updated", 1)
            .with("old_hash", "aa")
            .with("new_hash", "bb");
        let v = report.to_json();
        assert_eq!(v["success"], true);
        assert_eq!(v["message"], "Avatar updated");
        assert_eq!(v["attempts"], 1);
        assert_eq!(v["old_hash"], "aa");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn test_error_report_has_no_message() {
        let v = JobReport::err("User not found", 1).to_json();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "User not found");
        assert!(v.get("message").is_none());
    }
}
