//! Story ingestion pushed by external collectors.

use chrono::{DateTime, Utc};
use igmirror_core::models::NewStory;
use igmirror_core::store::ProfileStore;
use igmirror_core::MirrorError;
use reqwest::Url;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct InjectRequest {
    pub username: Option<String>,
    pub story_id: Option<String>,
    pub thumbnail: Option<String>,
    pub media: Option<String>,
    pub created_datetime: Option<String>,
}

/// Validated form of [`InjectRequest`].
#[derive(Debug, Clone)]
pub struct InjectData {
    pub username: String,
    pub story_id: String,
    pub thumbnail: String,
    pub media: String,
    pub created_datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InjectResult {
    pub message: String,
    pub user_created: bool,
    pub story_created: bool,
    pub username: String,
    pub story_id: String,
    pub thumbnail_url: String,
    pub media_url: String,
    pub processed_at: DateTime<Utc>,
}

impl InjectRequest {
    /// Field name → error messages for every invalid field.
    pub fn validate(self) -> Result<InjectData, serde_json::Map<String, serde_json::Value>> {
        let mut errors = serde_json::Map::new();

        let username = required(&mut errors, "username", self.username);
        let story_id = required(&mut errors, "story_id", self.story_id);
        let thumbnail = required(&mut errors, "thumbnail", self.thumbnail)
            .and_then(|u| url_field(&mut errors, "thumbnail", u));
        let media = required(&mut errors, "media", self.media)
            .and_then(|u| url_field(&mut errors, "media", u));
        let created = required(&mut errors, "created_datetime", self.created_datetime).and_then(
            |s| match DateTime::parse_from_rfc3339(&s) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(_) => {
                    add_error(&mut errors, "created_datetime", "Datetime has wrong format.");
                    None
                }
            },
        );

        match (username, story_id, thumbnail, media, created) {
            (Some(username), Some(story_id), Some(thumbnail), Some(media), Some(created_datetime))
                if errors.is_empty() =>
            {
                Ok(InjectData {
                    username,
                    story_id,
                    thumbnail,
                    media,
                    created_datetime,
                })
            }
            _ => Err(errors),
        }
    }
}

fn add_error(errors: &mut serde_json::Map<String, serde_json::Value>, field: &str, msg: &str) {
    errors.insert(field.to_string(), serde_json::json!([msg]));
}

fn required(
    errors: &mut serde_json::Map<String, serde_json::Value>,
    field: &str,
    value: Option<String>,
) -> Option<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Some(v),
        Some(_) => {
            add_error(errors, field, "This field may not be blank.");
            None
        }
        None => {
            add_error(errors, field, "This field is required.");
            None
        }
    }
}

fn url_field(
    errors: &mut serde_json::Map<String, serde_json::Value>,
    field: &str,
    value: String,
) -> Option<String> {
    match Url::parse(&value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host().is_some() => Some(value),
        _ => {
            add_error(errors, field, "Enter a valid URL.");
            None
        }
    }
}

/// Get-or-create the profile and the story; existing rows are left untouched.
pub async fn inject_story(
    store: &dyn ProfileStore,
    data: InjectData,
) -> Result<InjectResult, MirrorError> {
    let (profile, user_created) = store.get_or_create_profile(&data.username).await?;

    let (_, story_created) = store
        .get_or_create_story(NewStory {
            story_id: data.story_id.clone(),
            user_id: profile.id,
            thumbnail_url: data.thumbnail.clone(),
            media_url: data.media.clone(),
            story_created_at: Some(data.created_datetime),
        })
        .await?;

    tracing::info!(
        username = %data.username,
        story_id = %data.story_id,
        user_created,
        story_created,
        "Instagram data injected"
    );

    Ok(InjectResult {
        message: "Instagram data processed successfully".to_string(),
        user_created,
        story_created,
        username: data.username,
        story_id: data.story_id,
        thumbnail_url: data.thumbnail,
        media_url: data.media,
        processed_at: if user_created {
            profile.created_at
        } else {
            profile.updated_at
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use igmirror_core::testing::MemoryStore;

    fn request() -> InjectRequest {
        InjectRequest {
            username: Some("alice".into()),
            story_id: Some("3001".into()),
            thumbnail: Some("https://cdn.example.com/t.jpg".into()),
            media: Some("https://cdn.example.com/m.mp4".into()),
            created_datetime: Some("2024-05-01T12:00:00Z".into()),
        }
    }

    #[test]
    fn test_validate_ok() {
        let data = request().validate().unwrap();
        assert_eq!(data.username, "alice");
        assert_eq!(data.created_datetime.timestamp(), 1_714_564_800);
    }

    #[test]
    fn test_validate_collects_field_errors() {
        let mut r = request();
        r.username = None;
        r.thumbnail = Some("not a url".into());
        r.created_datetime = Some("yesterday".into());
        let errors = r.validate().unwrap_err();
        assert_eq!(errors["username"][0], "This field is required.");
        assert_eq!(errors["thumbnail"][0], "Enter a valid URL.");
        assert_eq!(errors["created_datetime"][0], "Datetime has wrong format.");
        assert!(errors.get("media").is_none());
    }

    #[tokio::test]
    async fn test_inject_is_idempotent_per_story_id() {
        let store = MemoryStore::default();

        let first = inject_story(&store, request().validate().unwrap()).await.unwrap();
        assert!(first.user_created);
        assert!(first.story_created);

        let second = inject_story(&store, request().validate().unwrap()).await.unwrap();
        assert!(!second.user_created);
        assert!(!second.story_created);

        assert_eq!(store.stories().len(), 1);
    }
}
