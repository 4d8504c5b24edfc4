//! Story sync from the Core API.

use igmirror_core::models::{NewStory, Profile, Story};
use igmirror_core::store::from_unix_seconds;
use serde_json::Value;
use uuid::Uuid;

use super::download::{fetch_bytes, file_extension, DOWNLOAD_TIMEOUT};
use super::profile_sync::payload_ok;
use super::SyncError;
use crate::context::SyncContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorySync {
    pub username: String,
    pub found: usize,
    pub created: usize,
}

impl StorySync {
    pub fn message(&self) -> String {
        format!(
            "Stories updated for {}: {} found, {} new",
            self.username, self.found, self.created
        )
    }
}

/// Parse `data.items[]` of a stories payload. Items without an id are skipped.
pub fn parse_stories(user_id: Uuid, payload: &Value) -> Vec<NewStory> {
    let Some(items) = payload.pointer("/data/items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let story_id = match item.get("pk").or_else(|| item.get("id"))? {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let thumbnail_url = item
                .pointer("/image_versions2/candidates/0/url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let media_url = item
                .pointer("/video_versions/0/url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| thumbnail_url.clone());
            let story_created_at = item
                .get("taken_at")
                .and_then(Value::as_i64)
                .and_then(from_unix_seconds);

            Some(NewStory {
                story_id,
                user_id,
                thumbnail_url,
                media_url,
                story_created_at,
            })
        })
        .collect()
}

pub async fn update_stories_from_api(
    ctx: &SyncContext,
    profile_id: Uuid,
) -> Result<StorySync, SyncError> {
    let profile = ctx
        .profiles
        .get_profile(profile_id)
        .await?
        .ok_or(SyncError::NotFound)?;

    let instagram_id = profile
        .instagram_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            SyncError::RemoteData(format!(
                "User {} has no Instagram id; update the profile first",
                profile.username
            ))
        })?;

    let api = ctx.core_api().await?;
    let payload = api.fetch_user_stories_by_user_id(&instagram_id).await?;

    if !payload_ok(&payload) {
        let reason = payload
            .pointer("/data/errorMessage")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(SyncError::RemoteData(format!(
            "Error fetching stories for user {}. {}",
            profile.username, reason
        )));
    }

    let parsed = parse_stories(profile.id, &payload);
    let mut result = StorySync {
        username: profile.username.clone(),
        found: parsed.len(),
        created: 0,
    };

    for new_story in parsed {
        let (story, created) = ctx.profiles.get_or_create_story(new_story).await?;
        if created {
            result.created += 1;
        }
        if story.thumbnail.is_none() || story.media.is_none() {
            save_local_media(ctx, &profile, &story).await?;
        }
    }

    tracing::info!(
        username = %profile.username,
        found = result.found,
        created = result.created,
        "Stories synced"
    );
    Ok(result)
}

/// Download local copies of whichever of the story's thumbnail and media are
/// still missing. Failed downloads are logged and left for a later sync.
async fn save_local_media(
    ctx: &SyncContext,
    profile: &Profile,
    story: &Story,
) -> Result<(), SyncError> {
    let thumbnail = match story.thumbnail {
        Some(_) => None,
        None => download_asset(ctx, profile, story, &story.thumbnail_url, "thumbnail").await,
    };
    let media = match story.media {
        Some(_) => None,
        None if story.media_url == story.thumbnail_url => {
            thumbnail.clone().or_else(|| story.thumbnail.clone())
        }
        None => download_asset(ctx, profile, story, &story.media_url, "media").await,
    };

    if thumbnail.is_some() || media.is_some() {
        ctx.profiles
            .set_story_local_media(story.id, thumbnail.as_deref(), media.as_deref())
            .await?;
    }
    Ok(())
}

async fn download_asset(
    ctx: &SyncContext,
    profile: &Profile,
    story: &Story,
    url: &str,
    kind: &str,
) -> Option<String> {
    if url.is_empty() {
        return None;
    }

    let downloaded = match fetch_bytes(&ctx.http, url, DOWNLOAD_TIMEOUT).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(story_id = %story.story_id, kind, error = %e, "Story download failed");
            return None;
        }
    };

    let ext = file_extension(url, downloaded.content_type.as_deref());
    let path = format!(
        "users/{}/stories/{}_{}.{}",
        profile.username, story.story_id, kind, ext
    );
    match ctx.assets.write(&path, downloaded.bytes).await {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(story_id = %story.story_id, kind, error = %e, "Story asset write failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stories_payload() {
        let user = Uuid::new_v4();
        let payload = serde_json::json!({
            "data": {
                "status": true,
                "items": [
                    {
                        "pk": "3001",
                        "taken_at": 1_700_000_000,
                        "image_versions2": {"candidates": [{"url": "https://cdn.example.com/t1.jpg"}]},
                        "video_versions": [{"url": "https://cdn.example.com/v1.mp4"}]
                    },
                    {
                        "id": 3002,
                        "image_versions2": {"candidates": [{"url": "https://cdn.example.com/t2.jpg"}]}
                    },
                    {"taken_at": 5}
                ]
            }
        });

        let stories = parse_stories(user, &payload);
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].story_id, "3001");
        assert_eq!(stories[0].media_url, "https://cdn.example.com/v1.mp4");
        assert_eq!(stories[0].story_created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(stories[1].story_id, "3002");
        assert_eq!(stories[1].media_url, "https://cdn.example.com/t2.jpg");
        assert!(stories[1].story_created_at.is_none());
        assert!(stories.iter().all(|s| s.user_id == user));
    }

    #[test]
    fn test_parse_stories_without_items() {
        assert!(parse_stories(Uuid::nil(), &serde_json::json!({"data": {"status": true}})).is_empty());
    }
}
