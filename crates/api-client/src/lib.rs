pub mod client;
pub mod error;
pub mod retry;

pub use client::ApiClient;
pub use error::ApiClientError;
pub use liftlog_api_types;
pub use retry::{push_draft_with_retry, RetryPolicy};
