//! Profile sync from the Core API.
//!
//! Lookup is by username first. When that payload signals failure and the
//! Instagram id is already known, the id lookup is tried instead. The two
//! endpoints return differently shaped user objects; each has its own parser
//! producing a [`ProfileSnapshot`], and only fields present in the snapshot
//! overwrite the stored profile.

use chrono::Utc;
use igmirror_core::models::Profile;
use igmirror_core::SyncJob;
use serde_json::Value;
use uuid::Uuid;

use super::SyncError;
use crate::context::SyncContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    Username,
    UserId,
}

impl LookupPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupPath::Username => "username_v2",
            LookupPath::UserId => "user_id",
        }
    }
}

/// Provider user object normalized across both lookup endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSnapshot {
    pub instagram_id: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub profile_pic_url: Option<String>,
    pub is_private: Option<bool>,
    pub is_verified: Option<bool>,
    pub media_count: i64,
    pub follower_count: i64,
    pub following_count: i64,
}

impl ProfileSnapshot {
    /// `fetch_user_info_by_username_v2`: id in `pk`, flat counters.
    pub fn from_username_v2(data: &Value) -> Self {
        Self {
            instagram_id: id_field(data, "pk"),
            media_count: count(data.get("media_count")),
            follower_count: count(data.get("follower_count")),
            following_count: count(data.get("following_count")),
            ..Self::common(data)
        }
    }

    /// `fetch_user_info_by_user_id`: id in `id`, counters under edge objects.
    pub fn from_user_id(data: &Value) -> Self {
        Self {
            instagram_id: id_field(data, "id"),
            media_count: count(data.pointer("/edge_owner_to_timeline_media/count")),
            follower_count: count(data.pointer("/edge_followed_by/count")),
            following_count: count(data.pointer("/edge_follow/count")),
            ..Self::common(data)
        }
    }

    pub fn parse(path: LookupPath, data: &Value) -> Self {
        match path {
            LookupPath::Username => Self::from_username_v2(data),
            LookupPath::UserId => Self::from_user_id(data),
        }
    }

    fn common(data: &Value) -> Self {
        Self {
            username: non_empty_str(data, "username"),
            full_name: str_field(data, "full_name"),
            biography: str_field(data, "biography"),
            profile_pic_url: str_field(data, "profile_pic_url"),
            is_private: data.get("is_private").and_then(Value::as_bool),
            is_verified: data.get("is_verified").and_then(Value::as_bool),
            ..Self::default()
        }
    }

    /// Overwrite `profile` with every field this snapshot carries.
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(id) = &self.instagram_id {
            profile.instagram_id = Some(id.clone());
        }
        if let Some(v) = &self.username {
            profile.username = v.clone();
        }
        if let Some(v) = &self.full_name {
            profile.full_name = v.clone();
        }
        if let Some(v) = &self.biography {
            profile.biography = v.clone();
        }
        if let Some(v) = &self.profile_pic_url {
            profile.original_profile_picture_url = v.clone();
        }
        if let Some(v) = self.is_private {
            profile.is_private = v;
        }
        if let Some(v) = self.is_verified {
            profile.is_verified = v;
        }
        profile.media_count = self.media_count;
        profile.follower_count = self.follower_count;
        profile.following_count = self.following_count;
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn non_empty_str(data: &Value, key: &str) -> Option<String> {
    str_field(data, key).filter(|s| !s.is_empty())
}

/// Ids come back as strings or numbers depending on the endpoint.
fn id_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count(v: Option<&Value>) -> i64 {
    v.and_then(Value::as_i64).unwrap_or(0).max(0)
}

/// `data` is present and `data.status` is `true`.
pub fn payload_ok(payload: &Value) -> bool {
    payload
        .get("data")
        .and_then(|d| d.get("status"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn failure_message(payload: &Value) -> String {
    payload
        .pointer("/data/errorMessage")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Result of a successful sync.
#[derive(Debug, Clone)]
pub struct ProfileSync {
    pub profile: Profile,
    pub lookup: LookupPath,
    pub avatar_job: Option<Uuid>,
}

/// Refresh one profile from the Core API and persist it.
pub async fn update_profile_from_api(
    ctx: &SyncContext,
    profile_id: Uuid,
) -> Result<ProfileSync, SyncError> {
    let mut profile = ctx
        .profiles
        .get_profile(profile_id)
        .await?
        .ok_or(SyncError::NotFound)?;

    let api = ctx.core_api().await?;

    let mut payload = api.fetch_user_info_by_username_v2(&profile.username).await?;
    let mut lookup = LookupPath::Username;

    if !payload_ok(&payload) {
        if let Some(instagram_id) = profile.instagram_id.clone().filter(|id| !id.is_empty()) {
            tracing::info!(
                username = %profile.username,
                instagram_id = %instagram_id,
                "Username lookup failed, falling back to user id"
            );
            payload = api.fetch_user_info_by_user_id(&instagram_id).await?;
            lookup = LookupPath::UserId;
        }
    }

    if !payload_ok(&payload) {
        let msg = format!(
            "Error fetching data for user {}. {}",
            profile.username,
            failure_message(&payload)
        );
        tracing::error!(username = %profile.username, lookup = lookup.as_str(), "{}", msg);
        return Err(SyncError::RemoteData(msg));
    }

    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    ProfileSnapshot::parse(lookup, &data).apply(&mut profile);
    profile.raw_api_data = Some(data);
    profile.api_updated_at = Some(Utc::now());

    ctx.profiles.save_profile(&profile).await?;
    tracing::info!(
        username = %profile.username,
        lookup = lookup.as_str(),
        "Profile updated from Core API"
    );

    let avatar_job = queue_avatar_refresh(ctx, &profile).await;

    Ok(ProfileSync {
        profile,
        lookup,
        avatar_job,
    })
}

/// Queue an avatar refresh after a save, when there is a URL to fetch from.
pub async fn queue_avatar_refresh(ctx: &SyncContext, profile: &Profile) -> Option<Uuid> {
    if profile.original_profile_picture_url.is_empty() {
        return None;
    }
    match ctx
        .queue
        .enqueue(&SyncJob::RefreshAvatar {
            profile_id: profile.id,
        })
        .await
    {
        Ok(id) => {
            tracing::info!(username = %profile.username, job_id = %id, "Avatar refresh queued");
            Some(id)
        }
        Err(e) => {
            tracing::warn!(username = %profile.username, error = %e, "Failed to queue avatar refresh");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_v2_parser() {
        let data = serde_json::json!({
            "status": true,
            "pk": "1234",
            "username": "alice",
            "full_name": "Alice A",
            "biography": "hi",
            "profile_pic_url": "https://cdn.example.com/a.jpg",
            "is_private": false,
            "is_verified": true,
            "media_count": 10,
            "follower_count": 200,
            "following_count": 30
        });
        let s = ProfileSnapshot::from_username_v2(&data);
        assert_eq!(s.instagram_id.as_deref(), Some("1234"));
        assert_eq!(s.username.as_deref(), Some("alice"));
        assert_eq!(s.is_verified, Some(true));
        assert_eq!((s.media_count, s.follower_count, s.following_count), (10, 200, 30));
    }

    #[test]
    fn test_user_id_parser_reads_edge_counters() {
        let data = serde_json::json!({
            "status": true,
            "id": 987,
            "username": "alice",
            "edge_owner_to_timeline_media": {"count": 5},
            "edge_followed_by": {"count": 600},
            "edge_follow": {"count": 7},
            "media_count": 999
        });
        let s = ProfileSnapshot::from_user_id(&data);
        assert_eq!(s.instagram_id.as_deref(), Some("987"));
        assert_eq!((s.media_count, s.follower_count, s.following_count), (5, 600, 7));
    }

    #[test]
    fn test_missing_counters_default_to_zero() {
        let s = ProfileSnapshot::from_user_id(&serde_json::json!({"id": "1"}));
        assert_eq!((s.media_count, s.follower_count, s.following_count), (0, 0, 0));
        assert_eq!(s.full_name, None);
    }

    #[test]
    fn test_apply_skips_missing_fields() {
        let mut p = Profile::new("alice");
        p.instagram_id = Some("1234".into());
        p.full_name = "Alice Original".into();
        p.biography = "keep me".into();

        let snap = ProfileSnapshot::from_username_v2(&serde_json::json!({"full_name": "Alice New"}));
        snap.apply(&mut p);

        assert_eq!(p.full_name, "Alice New");
        assert_eq!(p.biography, "keep me");
        assert_eq!(p.instagram_id.as_deref(), Some("1234"));
        assert_eq!(p.username, "alice");
    }

    #[test]
    fn test_payload_ok() {
        assert!(payload_ok(&serde_json::json!({"data": {"status": true}})));
        assert!(!payload_ok(&serde_json::json!({"data": {"status": false}})));
        assert!(!payload_ok(&serde_json::json!({"data": {}})));
        assert!(!payload_ok(&serde_json::json!({"data": null})));
        assert!(!payload_ok(&serde_json::json!({})));
    }
}
