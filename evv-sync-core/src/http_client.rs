//! Thin wrapper over `reqwest` for the two outbound shapes the core
//! needs: posting a queued action's payload, and pulling a change-set
//! since a cursor. Response classification lives in `offline_queue`;
//! this module only knows how to make the request and shape the result.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const MUTATION_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

/// Outcome of a mutation POST: either it succeeded, or it failed with a
/// status the caller must classify.
pub enum MutationOutcome {
    Success(serde_json::Value),
    ServerError { status: u16, body: Option<ServerErrorBody> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerChange {
    pub kind: String,
    pub id: String,
    pub op: ChangeOp,
    pub record: serde_json::Value,
    pub server_version: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncPullResponse {
    pub changes: Vec<ServerChange>,
    pub cursor: String,
}

pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}/{}", self.base_url.trim_end_matches('/'), path))
            .timeout(timeout);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }

    pub async fn post_action(&self, endpoint: &str, payload: &serde_json::Value) -> CoreResult<MutationOutcome> {
        let response = self
            .request(reqwest::Method::POST, endpoint, MUTATION_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            Ok(MutationOutcome::Success(body))
        } else {
            let body = response.json::<ServerErrorBody>().await.ok();
            Ok(MutationOutcome::ServerError {
                status: status.as_u16(),
                body,
            })
        }
    }

    pub async fn pull_changes(&self, since_cursor: Option<&str>) -> CoreResult<SyncPullResponse> {
        let path = match since_cursor {
            Some(cursor) => format!("sync?since={cursor}"),
            None => "sync".to_string(),
        };
        let response = self
            .request(reqwest::Method::GET, &path, PULL_TIMEOUT)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Server {
                status: status.as_u16(),
                code: None,
            });
        }
        response
            .json::<SyncPullResponse>()
            .await
            .map_err(|e| CoreError::Network(format!("malformed sync response: {e}")))
    }
}
