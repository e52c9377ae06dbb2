//! Remote access to the position endpoints.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::api::ORGANIZATION_HEADER;
use super::models::{ContextKey, MoveOutcome, MoveRequest, TaskPosition};
use crate::errors::PositionError;

/// Where the client cache reads and writes positions.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// All stored positions of a group, ascending.
    async fn fetch_positions(&self, key: &ContextKey) -> Result<Vec<TaskPosition>, PositionError>;

    /// Perform a move and return the authoritative group.
    async fn move_position(&self, req: &MoveRequest) -> Result<MoveOutcome, PositionError>;
}

/// [`PositionSource`] backed by the HTTP API.
#[derive(Clone)]
pub struct HttpPositionClient {
    http: reqwest::Client,
    base_url: String,
    organization_id: i64,
}

impl HttpPositionClient {
    pub fn new(base_url: impl Into<String>, organization_id: i64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            organization_id,
        }
    }

    fn positions_url(&self, key: &ContextKey) -> String {
        match key.context_id() {
            Some(id) => format!("{}/api/task-positions/{}/{}", self.base_url, key.context(), id),
            None => format!("{}/api/task-positions/{}", self.base_url, key.context()),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, PositionError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| PositionError::Remote(format!("Invalid response body: {}", e)));
        }

        let message = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string());
        Err(match status {
            StatusCode::NOT_FOUND => PositionError::NotFound(message),
            StatusCode::CONFLICT => PositionError::Conflict(message),
            StatusCode::BAD_REQUEST => PositionError::Validation(message),
            _ => PositionError::Remote(format!("{}: {}", status, message)),
        })
    }
}

#[async_trait]
impl PositionSource for HttpPositionClient {
    async fn fetch_positions(&self, key: &ContextKey) -> Result<Vec<TaskPosition>, PositionError> {
        let resp = self
            .http
            .get(self.positions_url(key))
            .header(ORGANIZATION_HEADER, self.organization_id)
            .send()
            .await
            .map_err(|e| PositionError::Remote(e.to_string()))?;
        Self::read_json(resp).await
    }

    async fn move_position(&self, req: &MoveRequest) -> Result<MoveOutcome, PositionError> {
        let resp = self
            .http
            .patch(format!("{}/api/task-positions/update", self.base_url))
            .header(ORGANIZATION_HEADER, self.organization_id)
            .json(req)
            .send()
            .await
            .map_err(|e| PositionError::Remote(e.to_string()))?;
        Self::read_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_url_with_and_without_id() {
        let client = HttpPositionClient::new("http://localhost:3142/", 1);
        assert_eq!(
            client.positions_url(&ContextKey::project(5)),
            "http://localhost:3142/api/task-positions/project/5"
        );
        assert_eq!(
            client.positions_url(&ContextKey::all_projects()),
            "http://localhost:3142/api/task-positions/all_projects"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_remote_error() {
        // Port 9 (discard) is essentially never listening on loopback.
        let client = HttpPositionClient::new("http://127.0.0.1:9", 1);
        let err = client
            .fetch_positions(&ContextKey::all_projects())
            .await
            .unwrap_err();
        assert!(matches!(err, PositionError::Remote(_)));
    }
}
