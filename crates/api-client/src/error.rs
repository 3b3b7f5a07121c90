use thiserror::Error;

pub type Result<T, E = ApiClientError> = std::result::Result<T, E>;

/// Errors from the studio API client.
///
/// [`ApiClientError::is_transient`] drives the push retry loop: network
/// failures and 5xx responses may be retried, everything else is final.
#[derive(Debug, Error)]
pub enum ApiClientError {
    /// Network-level failure: connect, timeout, TLS.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered 5xx.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// The backend rejected the request (4xx).
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// 2xx response whose body did not match the expected shape.
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("auth token not set")]
    Unauthenticated,
}

impl ApiClientError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiClientError::Transport(_) | ApiClientError::Server { .. }
        )
    }
}
