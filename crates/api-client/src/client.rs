use std::time::Duration;

use liftlog_api_types::*;

use crate::error::{ApiClientError, Result};

/// Typed HTTP client for the studio backend.
///
/// One method per endpoint, all using the stored bearer token. The client is
/// cheap to clone via its inner `reqwest::Client`; the session engine wraps it
/// in an `Arc` instead.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Create a new client with the given base URL and timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Create from an existing `reqwest::Client` (e.g. shared in tests).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    pub fn set_auth(&mut self, token: String) {
        self.auth_token = Some(token);
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn token(&self) -> Result<&str> {
        self.auth_token
            .as_deref()
            .ok_or(ApiClientError::Unauthenticated)
    }

    // ── Draft store ───────────────────────────────────────────────────────

    /// Fetch the current remote draft, if any. A 404 means no draft exists
    /// and is not an error.
    pub async fn get_draft(&self, query: &DraftQuery) -> Result<Option<DraftResponse>> {
        let token = self.token()?;
        let resp = self
            .client
            .get(self.url("/workouts/draft"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(parse_response(resp).await?))
    }

    /// Upsert the remote draft for this device's session.
    pub async fn save_draft(&self, req: &SaveDraftRequest) -> Result<()> {
        let token = self.token()?;
        let resp = self
            .client
            .post(self.url("/workouts/draft"))
            .bearer_auth(token)
            .json(req)
            .send()
            .await?;
        let _: OkResponse = parse_response(resp).await?;
        Ok(())
    }

    /// Remove the remote draft. Deleting an absent draft is not an error.
    pub async fn delete_draft(&self, query: &DraftQuery) -> Result<()> {
        let token = self.token()?;
        let resp = self
            .client
            .delete(self.url("/workouts/draft"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let _: OkResponse = parse_response(resp).await?;
        Ok(())
    }

    // ── Performance log ───────────────────────────────────────────────────

    /// Record one completed set. The response carries the durable id and the
    /// backend's canonical `performedAt` instant.
    pub async fn log_set(&self, req: &LogSetRequest) -> Result<LogSetResponse> {
        let token = self.token()?;
        let resp = self
            .client
            .post(self.url("/workouts/sets"))
            .bearer_auth(token)
            .json(req)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn check_personal_records(
        &self,
        req: &PersonalRecordCheckRequest,
    ) -> Result<PersonalRecordsResponse> {
        let token = self.token()?;
        let resp = self
            .client
            .post(self.url("/workouts/personal-records"))
            .bearer_auth(token)
            .json(req)
            .send()
            .await?;
        parse_response(resp).await
    }

    // ── Exercise history ──────────────────────────────────────────────────

    /// Recent performances for the given exercises, newest first.
    pub async fn exercise_history(&self, exercise_ids: &[i64]) -> Result<ExerciseHistoryResponse> {
        let token = self.token()?;
        let ids = exercise_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let resp = self
            .client
            .get(self.url("/exercises/history"))
            .bearer_auth(token)
            .query(&[("ids", ids)])
            .send()
            .await?;
        parse_response(resp).await
    }
}

/// Parse an HTTP response: return the deserialized body on 2xx, or a typed
/// error carrying the status and body text.
async fn parse_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(ApiClientError::Server {
                status: status.as_u16(),
                body,
            });
        }
        return Err(ApiClientError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    let body = resp.text().await?;
    Ok(serde_json::from_str(&body)?)
}
