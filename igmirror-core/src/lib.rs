pub mod assets;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod instagram;
pub mod jobs;
pub mod models;
pub mod openai;
pub mod queue;
pub mod request_log;
pub mod settings;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ApiClient, ApiError, ProviderEndpoint};
pub use config::MirrorConfig;
pub use error::MirrorError;
pub use instagram::CoreApi;
pub use jobs::{JobReport, SyncJob, TaskOutcome};
pub use queue::{JobBroker, JobQueue};
