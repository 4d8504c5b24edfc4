use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local mirror of one Instagram account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub instagram_id: Option<String>,
    pub username: String,
    pub full_name: String,
    pub biography: String,
    /// Path of the locally cached avatar, relative to the media root.
    pub profile_picture: Option<String>,
    pub original_profile_picture_url: String,
    pub is_private: bool,
    pub is_verified: bool,
    pub media_count: i64,
    pub follower_count: i64,
    pub following_count: i64,
    pub raw_api_data: Option<serde_json::Value>,
    pub allow_auto_update_stories: bool,
    pub allow_auto_update_profile: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub api_updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// A fresh, never-synced profile for `username`.
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instagram_id: None,
            username: username.into(),
            full_name: String::new(),
            biography: String::new(),
            profile_picture: None,
            original_profile_picture_url: String::new(),
            is_private: false,
            is_verified: false,
            media_count: 0,
            follower_count: 0,
            following_count: 0,
            raw_api_data: None,
            allow_auto_update_stories: false,
            allow_auto_update_profile: false,
            created_at: now,
            updated_at: now,
            api_updated_at: None,
        }
    }

    /// Asset path the avatar is cached under: `users/{username}/{username}_profile.jpg`.
    pub fn avatar_asset_path(&self) -> String {
        format!("users/{0}/{0}_profile.jpg", self.username)
    }
}

/// Which auto-update toggle a batch job enumerates by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoUpdate {
    Profile,
    Stories,
}
