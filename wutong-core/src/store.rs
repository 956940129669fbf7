//! Server-side authoritative session state.
//!
//! The store owns the only copy of each session's provider conversation. It
//! lives in process memory: records survive until the process exits and are
//! never expired or deleted.

use crate::error::SessionError;
use crate::provider::Turn;
use crate::story::StoryUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// One player decision, as logged by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceRecord {
    #[serde(alias = "choiceText")]
    pub choice: String,
    #[serde(default)]
    pub choice_index: usize,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Everything the server knows about one playthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Provider conversation, two turns per successful advance.
    pub history: Vec<Turn>,
    pub current_state: StoryUnit,
    pub choices: Vec<ChoiceRecord>,
    /// Last modification.
    pub timestamp: DateTime<Utc>,
}

impl SessionRecord {
    /// A fresh record positioned at the opening unit.
    pub fn fresh() -> Self {
        Self {
            history: Vec::new(),
            current_state: StoryUnit::opening(),
            choices: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Exclusive access to one record. Held across a whole advance.
pub type SessionHandle = Arc<Mutex<SessionRecord>>;

/// In-memory map from session id to record.
///
/// The map lock is only held for lookups and inserts; each record carries its
/// own mutex so that work on one session never waits on another.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session and return its id with the initial record.
    pub async fn create(&self) -> (String, SessionRecord) {
        let record = SessionRecord::fresh();
        let mut sessions = self.sessions.write().await;
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(id.clone(), Arc::new(Mutex::new(record.clone())));
        tracing::debug!(session_id = %id, "Created session");
        (id, record)
    }

    /// The lock handle for a session.
    pub async fn handle(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// A copy of the current record.
    ///
    /// Waits for any in-flight advance on the same session to finish.
    pub async fn get(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let handle = self.handle(session_id).await?;
        let record = handle.lock().await;
        Ok(record.clone())
    }

    /// Insert or overwrite the record for `session_id`.
    ///
    /// An existing record is replaced in place under its own lock, so a
    /// restore queues behind an advance already running on that session.
    pub async fn replace(&self, session_id: &str, record: SessionRecord) {
        let handle = {
            let mut sessions = self.sessions.write().await;
            match sessions.entry(session_id.to_string()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Mutex::new(record)));
                    return;
                }
            }
        };
        *handle.lock().await = record;
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
