use igmirror_core::assets::AssetStore;
use igmirror_core::queue::JobQueue;
use igmirror_core::request_log::RequestLogSink;
use igmirror_core::settings::SettingsStore;
use igmirror_core::store::ProfileStore;
use igmirror_core::{ApiError, CoreApi};
use std::sync::Arc;

/// Handles every task needs. Cheap to clone; holds no per-task state.
#[derive(Clone)]
pub struct SyncContext {
    pub profiles: Arc<dyn ProfileStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub request_log: Arc<dyn RequestLogSink>,
    pub assets: Arc<dyn AssetStore>,
    pub queue: Arc<dyn JobQueue>,
    /// Plain client for media downloads (not written to the request log).
    pub http: reqwest::Client,
}

impl SyncContext {
    /// Core API session built from the settings as they are right now.
    pub async fn core_api(&self) -> Result<CoreApi, ApiError> {
        CoreApi::connect(self.settings.as_ref(), self.request_log.clone()).await
    }
}
