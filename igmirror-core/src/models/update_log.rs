use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One story-sync attempt against a profile. Rows are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UpdateStoryLog {
    pub id: i64,
    pub user_id: Uuid,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const UPDATE_STATUS_SUCCESS: &str = "success";
pub const UPDATE_STATUS_FAILED: &str = "failed";
