//! Avatar refresh with content-hash change detection.
//!
//! The remote image is downloaded and hashed. The stored asset is only
//! replaced when the digests differ; after a write, only the profile's asset
//! pointer is updated.

use igmirror_core::assets::sha256_hex;
use igmirror_core::JobReport;
use uuid::Uuid;

use super::download::{fetch_bytes, DOWNLOAD_TIMEOUT};
use super::SyncError;
use crate::context::SyncContext;

/// What happened to the stored avatar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarChange {
    /// The profile has no URL to fetch from.
    NoSource,
    Unchanged,
    Updated {
        old_hash: Option<String>,
        new_hash: String,
    },
}

pub async fn refresh_avatar(ctx: &SyncContext, profile_id: Uuid) -> Result<AvatarChange, SyncError> {
    let profile = ctx
        .profiles
        .get_profile(profile_id)
        .await?
        .ok_or(SyncError::NotFound)?;

    if profile.original_profile_picture_url.is_empty() {
        tracing::info!(username = %profile.username, "No original profile picture URL");
        return Ok(AvatarChange::NoSource);
    }

    let downloaded = fetch_bytes(&ctx.http, &profile.original_profile_picture_url, DOWNLOAD_TIMEOUT)
        .await?;
    let new_hash = sha256_hex(&downloaded.bytes);

    let mut old_hash = None;
    if let Some(path) = profile.profile_picture.as_deref().filter(|p| !p.is_empty()) {
        match ctx.assets.read(path).await {
            Ok(existing) => old_hash = Some(sha256_hex(&existing)),
            Err(e) => tracing::warn!(
                username = %profile.username,
                path,
                error = %e,
                "Could not read existing profile picture"
            ),
        }
    }

    if old_hash.as_deref() == Some(new_hash.as_str()) {
        tracing::info!(username = %profile.username, "Profile picture unchanged");
        return Ok(AvatarChange::Unchanged);
    }

    let path = profile.avatar_asset_path();
    ctx.assets.write(&path, downloaded.bytes).await?;
    ctx.profiles.set_avatar_path(profile.id, &path).await?;

    tracing::info!(username = %profile.username, path = %path, "Profile picture updated");
    Ok(AvatarChange::Updated { old_hash, new_hash })
}

/// Terminal report for a finished refresh.
pub fn report(change: AvatarChange, attempts: u32) -> JobReport {
    match change {
        AvatarChange::NoSource => JobReport::err("No original profile picture URL", attempts),
        AvatarChange::Unchanged => JobReport::ok("No changes detected", attempts),
        AvatarChange::Updated { old_hash, new_hash } => {
            JobReport::ok("Profile picture updated", attempts)
                .with("old_hash", old_hash)
                .with("new_hash", new_hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_shapes() {
        let r = report(AvatarChange::Unchanged, 1).to_json();
        assert_eq!(r["success"], true);
        assert_eq!(r["message"], "No changes detected");

        let r = report(
            AvatarChange::Updated {
                old_hash: None,
                new_hash: "ab".into(),
            },
            2,
        )
        .to_json();
        assert_eq!(r["message"], "Profile picture updated");
        assert!(r["old_hash"].is_null());
        assert_eq!(r["new_hash"], "ab");
        assert_eq!(r["attempts"], 2);

        let r = report(AvatarChange::NoSource, 1).to_json();
        assert_eq!(r["success"], false);
        assert_eq!(r["error"], "No original profile picture URL");
    }
}
