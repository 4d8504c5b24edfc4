use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Story {
    pub id: Uuid,
    pub story_id: String,
    pub user_id: Uuid,
    pub thumbnail_url: String,
    pub media_url: String,
    pub thumbnail: Option<String>,
    pub media: Option<String>,
    pub story_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields used when a story is created for the first time.
#[derive(Debug, Clone)]
pub struct NewStory {
    pub story_id: String,
    pub user_id: Uuid,
    pub thumbnail_url: String,
    pub media_url: String,
    pub story_created_at: Option<DateTime<Utc>>,
}
