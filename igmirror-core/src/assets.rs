//! Local-filesystem asset store for avatars and story media.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Byte storage addressed by a relative path such as
/// `users/alice/alice_profile.jpg`.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn read(&self, path: &str) -> io::Result<Bytes>;

    /// Write `data` under `path`, replacing any existing file.
    async fn write(&self, path: &str, data: Bytes) -> io::Result<()>;
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("asset path must be relative and stay under the media root: {path}"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn read(&self, path: &str) -> io::Result<Bytes> {
        let full = self.resolve(path)?;
        Ok(Bytes::from(tokio::fs::read(full).await?))
    }

    async fn write(&self, path: &str, data: Bytes) -> io::Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a sibling temp file first so readers never see a partial asset.
        let tmp = full.with_extension("partial");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &full).await?;
        tracing::debug!(path, bytes = data.len(), "Asset written");
        Ok(())
    }
}
