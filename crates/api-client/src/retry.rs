use std::time::Duration;

use tracing::warn;

use liftlog_api_types::SaveDraftRequest;

use crate::client::ApiClient;
use crate::error::Result;

/// Retry behaviour for draft pushes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of tries, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Push a draft, retrying transient failures with exponential backoff.
///
/// Network errors and 5xx responses are retried up to
/// [`RetryPolicy::max_attempts`] total tries; 4xx returns immediately. The
/// error of the final attempt is returned unchanged.
pub async fn push_draft_with_retry(
    api: &ApiClient,
    request: &SaveDraftRequest,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 1u32;
    loop {
        match api.save_draft(request).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "draft push attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use crate::error::ApiClientError;

    /// Draft endpoint that answers 500 for the first `fail_first` hits.
    async fn spawn_flaky_draft_server(fail_first: u32) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/workouts/draft",
            post(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < fail_first {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(serde_json::json!({"error": "draft store unavailable"})),
                        )
                    } else {
                        (StatusCode::OK, Json(serde_json::json!({"ok": true})))
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn request() -> SaveDraftRequest {
        SaveDraftRequest {
            device_id: "dev-a".to_string(),
            training_id: None,
            workout_plan_id: Some(42),
            session_data: serde_json::json!({"name": "Push Day"}),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));

        let half = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(half.delay_for(1), Duration::from_millis(500));
        assert_eq!(half.delay_for(2), Duration::from_secs(1));
        assert_eq!(half.delay_for(3), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_push_recovers_after_transient_failure() {
        let (base, hits) = spawn_flaky_draft_server(1).await;
        let mut api = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
        api.set_auth("studio-key".to_string());

        push_draft_with_retry(&api, &request(), &fast_policy())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_push_gives_up_after_three_attempts() {
        let (base, hits) = spawn_flaky_draft_server(u32::MAX).await;
        let mut api = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
        api.set_auth("studio-key".to_string());

        let err = push_draft_with_retry(&api, &request(), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiClientError::Server { status: 500, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_push_rejection_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/workouts/draft",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"error": "unknown plan"})),
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut api =
            ApiClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        api.set_auth("studio-key".to_string());

        let err = push_draft_with_retry(&api, &request(), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiClientError::Rejected { status: 400, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
