pub mod auth;
pub mod context;
pub mod firebase;
pub mod http;
pub mod router;
pub mod subsystems;
pub mod worker;
