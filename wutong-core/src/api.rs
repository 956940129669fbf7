//! The session contract as seen by clients, plus its JSON wire types.
//!
//! [`SessionApi`] is implemented in-process by [`SessionController`] and over
//! HTTP by [`crate::remote::RemoteSession`], so the client side never cares
//! which one it talks to.

use crate::controller::{SessionController, StartedSession};
use crate::error::SessionError;
use crate::provider::Turn;
use crate::store::{ChoiceRecord, SessionRecord};
use crate::story::StoryUnit;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The server's view of a session, as returned by `GET /api/session/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub story: StoryUnit,
    pub choice_history: Vec<ChoiceRecord>,
    pub timestamp: DateTime<Utc>,
    /// Authoritative provider conversation, for autosaves.
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl SessionView {
    pub fn from_record(session_id: impl Into<String>, record: SessionRecord) -> Self {
        Self {
            session_id: session_id.into(),
            story: record.current_state,
            choice_history: record.choices,
            timestamp: record.timestamp,
            history: record.history,
        }
    }
}

/// Operations a client needs from the session server.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn start(&self) -> Result<StartedSession, SessionError>;

    async fn advance(
        &self,
        session_id: &str,
        choice: &str,
        choice_index: usize,
    ) -> Result<StoryUnit, SessionError>;

    async fn session(&self, session_id: &str) -> Result<SessionView, SessionError>;

    async fn restore(&self, session_id: &str, session_data: Value)
        -> Result<StoryUnit, SessionError>;
}

#[async_trait]
impl SessionApi for SessionController {
    async fn start(&self) -> Result<StartedSession, SessionError> {
        Ok(SessionController::start(self).await)
    }

    async fn advance(
        &self,
        session_id: &str,
        choice: &str,
        choice_index: usize,
    ) -> Result<StoryUnit, SessionError> {
        SessionController::advance(self, session_id, choice, choice_index).await
    }

    async fn session(&self, session_id: &str) -> Result<SessionView, SessionError> {
        let record = self.snapshot(session_id).await?;
        Ok(SessionView::from_record(session_id, record))
    }

    async fn restore(
        &self,
        session_id: &str,
        session_data: Value,
    ) -> Result<StoryUnit, SessionError> {
        SessionController::restore(self, session_id, session_data).await
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Body of `POST /api/continue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequest {
    pub session_id: String,
    pub choice: String,
    #[serde(default)]
    pub choice_index: usize,
}

/// Response of `POST /api/continue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueResponse {
    pub story: StoryUnit,
}

/// Body of `POST /api/restore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub session_id: String,
    #[serde(default)]
    pub session_data: Value,
}

/// Response of `POST /api/restore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub success: bool,
    pub story: StoryUnit,
}

/// Error body for non-success responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
