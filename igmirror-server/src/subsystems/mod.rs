pub mod avatar;
pub mod download;
pub mod inject;
pub mod profile_sync;
pub mod scheduler;
pub mod stories;
pub mod tasks;

use igmirror_core::{ApiError, MirrorError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The provider answered but flagged the lookup as failed.
    #[error("{0}")]
    RemoteData(String),

    #[error("User not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] MirrorError),
}
