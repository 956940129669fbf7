//! HTTP client for a remote session server.

use crate::api::{
    ContinueRequest, ContinueResponse, ErrorBody, RestoreRequest, RestoreResponse, SessionApi,
    SessionView,
};
use crate::controller::StartedSession;
use crate::error::SessionError;
use crate::story::StoryUnit;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Generous enough to cover a slow provider call behind `/api/continue`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Talks to a `wutong-server` over its JSON API.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteSession {
    /// Create a client for the server at `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `/api/session/{id}` with the id percent-encoded as one path segment.
    fn session_url(&self, session_id: &str) -> Result<reqwest::Url, SessionError> {
        let mut url = reqwest::Url::parse(&self.url("/api/session"))
            .map_err(|e| SessionError::Transport(format!("invalid server URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| SessionError::Transport("server URL cannot take a path".to_string()))?
            .push(session_id);
        Ok(url)
    }
}

/// Decode a success body, or map the error status onto a session error.
async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    session_id: Option<&str>,
) -> Result<T, SessionError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| SessionError::Transport(format!("unreadable response: {e}")));
    }

    let body = response.text().await.unwrap_or_default();
    let (error, details) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => (parsed.error, parsed.details),
        Err(_) => (body, None),
    };

    Err(match status {
        StatusCode::NOT_FOUND => SessionError::NotFound(session_id.unwrap_or_default().to_string()),
        StatusCode::BAD_REQUEST => SessionError::InvalidPayload(details.unwrap_or(error)),
        _ => SessionError::Remote {
            status: status.as_u16(),
            message: match details {
                Some(details) => format!("{error}: {details}"),
                None => error,
            },
        },
    })
}

fn transport(err: reqwest::Error) -> SessionError {
    SessionError::Transport(err.to_string())
}

#[async_trait]
impl SessionApi for RemoteSession {
    async fn start(&self) -> Result<StartedSession, SessionError> {
        let response = self
            .client
            .post(self.url("/api/start"))
            .send()
            .await
            .map_err(transport)?;
        decode(response, None).await
    }

    async fn advance(
        &self,
        session_id: &str,
        choice: &str,
        choice_index: usize,
    ) -> Result<StoryUnit, SessionError> {
        let request = ContinueRequest {
            session_id: session_id.to_string(),
            choice: choice.to_string(),
            choice_index,
        };
        let response = self
            .client
            .post(self.url("/api/continue"))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let body: ContinueResponse = decode(response, Some(session_id)).await?;
        Ok(body.story)
    }

    async fn session(&self, session_id: &str) -> Result<SessionView, SessionError> {
        let response = self
            .client
            .get(self.session_url(session_id)?)
            .send()
            .await
            .map_err(transport)?;
        decode(response, Some(session_id)).await
    }

    async fn restore(
        &self,
        session_id: &str,
        session_data: Value,
    ) -> Result<StoryUnit, SessionError> {
        let request = RestoreRequest {
            session_id: session_id.to_string(),
            session_data,
        };
        let response = self
            .client
            .post(self.url("/api/restore"))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let body: RestoreResponse = decode(response, Some(session_id)).await?;
        Ok(body.story)
    }
}
