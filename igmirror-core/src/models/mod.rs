pub mod account;
pub mod profile;
pub mod request_log;
pub mod story;
pub mod update_log;

pub use account::Account;
pub use profile::{AutoUpdate, Profile};
pub use request_log::{LogStatus, RequestLog};
pub use story::{NewStory, Story};
pub use update_log::UpdateStoryLog;
