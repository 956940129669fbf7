//! Journey persistence for save/load functionality.
//!
//! Two kinds of slot live in client storage:
//! - a single autosave, overwritten after every state change
//! - named saves, a title → snapshot collection kept in insertion order
//!
//! Snapshots are read leniently because older clients wrote other shapes;
//! reconciling the session body itself is left to [`crate::restore`].

mod storage;

pub use storage::{FileSlots, MemorySlots, SlotStore};

use crate::journal::{JournalEntry, JourneyJournal};
use crate::provider::Turn;
use crate::story::StoryUnit;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Storage key of the autosave slot.
pub const AUTOSAVE_KEY: &str = "wutongMountainAutosave";

/// Storage key of the named-save collection.
pub const SAVES_KEY: &str = "wutongMountainSaves";

/// Title the autosave is listed under. Not available for named saves.
pub const AUTOSAVE_DISPLAY_NAME: &str = "🔄 Autosave (Latest)";

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Slot {key} holds unreadable data: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("\"{0}\" is reserved for the autosave")]
    ReservedTitle(String),

    #[error("Save title must not be empty")]
    EmptyTitle,
}

/// Everything needed to resume a journey, as written to a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub session_id: String,

    /// The session body. Raw JSON: old saves hold several shapes here.
    #[serde(default)]
    pub session_data: Value,

    #[serde(default, deserialize_with = "lenient_entries")]
    pub journal_entries: Vec<JournalEntry>,

    #[serde(default)]
    pub step_count: u32,

    #[serde(default)]
    pub dream_count: u32,

    /// Epoch milliseconds on the wire.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,

    #[serde(default = "unknown_location")]
    pub location: String,
}

fn unknown_location() -> String {
    "Unknown".to_string()
}

/// Journal entries that fail to decode are skipped rather than failing the
/// whole snapshot.
fn lenient_entries<'de, D>(deserializer: D) -> Result<Vec<JournalEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

impl PersistedSnapshot {
    /// Capture the client's view of a journey together with the server's
    /// authoritative history.
    pub fn capture(
        session_id: impl Into<String>,
        history: Vec<Turn>,
        current_state: &StoryUnit,
        journal: &JourneyJournal,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            session_data: serde_json::json!({
                "history": history,
                "currentState": current_state,
            }),
            journal_entries: journal.entries().to_vec(),
            step_count: journal.step_count(),
            dream_count: journal.dream_count(),
            start_time: Some(journal.start_time()),
            saved_at: Utc::now(),
            location: current_state.location().to_string(),
        }
    }

    /// Rebuild the journal this snapshot was taken from.
    ///
    /// Snapshots without a start time restart the clock now.
    pub fn journal(&self) -> JourneyJournal {
        JourneyJournal::rehydrate(
            self.journal_entries.clone(),
            self.start_time.unwrap_or_else(Utc::now),
            self.step_count,
            self.dream_count,
        )
    }

    fn listing(&self, title: impl Into<String>, is_autosave: bool) -> SaveListing {
        SaveListing {
            title: title.into(),
            saved_at: self.saved_at,
            location: self.location.clone(),
            step_count: self.step_count,
            dream_count: self.dream_count,
            is_autosave,
        }
    }
}

/// Summary of one slot for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveListing {
    pub title: String,
    pub saved_at: DateTime<Utc>,
    pub location: String,
    pub step_count: u32,
    pub dream_count: u32,
    pub is_autosave: bool,
}

/// Result of writing a named save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// An existing save with the same title was overwritten.
    pub replaced: bool,
}

/// Manages the autosave slot and the named-save collection.
#[derive(Clone)]
pub struct PersistenceManager {
    slots: Arc<dyn SlotStore>,
}

impl PersistenceManager {
    pub fn new(slots: Arc<dyn SlotStore>) -> Self {
        Self { slots }
    }

    /// Overwrite the autosave.
    pub async fn save_autosave(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistError> {
        let content = serde_json::to_string(snapshot)?;
        self.slots.write(AUTOSAVE_KEY, &content).await?;
        tracing::debug!(
            session_id = %snapshot.session_id,
            step = snapshot.step_count,
            "Autosave written"
        );
        Ok(())
    }

    pub async fn load_autosave(&self) -> Result<Option<PersistedSnapshot>, PersistError> {
        match self.slots.read(AUTOSAVE_KEY).await? {
            Some(content) => decode(AUTOSAVE_KEY, &content).map(Some),
            None => Ok(None),
        }
    }

    pub async fn has_autosave(&self) -> Result<bool, PersistError> {
        Ok(self.slots.read(AUTOSAVE_KEY).await?.is_some())
    }

    pub async fn clear_autosave(&self) -> Result<(), PersistError> {
        self.slots.remove(AUTOSAVE_KEY).await
    }

    /// Write a named save, overwriting any save with the same title.
    ///
    /// The outcome reports whether something was overwritten; callers decide
    /// whether that deserves a confirmation.
    pub async fn save_named(
        &self,
        title: &str,
        snapshot: &PersistedSnapshot,
    ) -> Result<SaveOutcome, PersistError> {
        if title.trim().is_empty() {
            return Err(PersistError::EmptyTitle);
        }
        if title == AUTOSAVE_DISPLAY_NAME {
            return Err(PersistError::ReservedTitle(title.to_string()));
        }

        let mut saves = self.read_saves().await?;
        let replaced = saves
            .insert(title.to_string(), serde_json::to_value(snapshot)?)
            .is_some();
        self.write_saves(&saves).await?;

        if replaced {
            tracing::warn!(title, "Named save overwritten");
        } else {
            tracing::info!(title, "Named save written");
        }
        Ok(SaveOutcome { replaced })
    }

    /// Remove a named save. Returns whether it existed.
    pub async fn delete_named(&self, title: &str) -> Result<bool, PersistError> {
        let mut saves = self.read_saves().await?;
        if saves.shift_remove(title).is_none() {
            return Ok(false);
        }
        self.write_saves(&saves).await?;
        tracing::info!(title, "Named save deleted");
        Ok(true)
    }

    /// The named save titled `title`, if any.
    pub async fn named(&self, title: &str) -> Result<Option<PersistedSnapshot>, PersistError> {
        let saves = self.read_saves().await?;
        match saves.get(title) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| PersistError::Corrupt {
                    key: format!("{SAVES_KEY}/{title}"),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Every save, named ones in insertion order followed by the autosave.
    ///
    /// Unreadable entries are left out of the listing but stay in storage.
    pub async fn list(&self) -> Result<Vec<SaveListing>, PersistError> {
        let mut listings = Vec::new();

        for (title, value) in self.read_saves().await? {
            match serde_json::from_value::<PersistedSnapshot>(value) {
                Ok(snapshot) => listings.push(snapshot.listing(title, false)),
                Err(e) => tracing::warn!(title = %title, error = %e, "Skipping unreadable save"),
            }
        }

        match self.load_autosave().await {
            Ok(Some(autosave)) => listings.push(autosave.listing(AUTOSAVE_DISPLAY_NAME, true)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable autosave"),
        }

        Ok(listings)
    }

    /// Whether any slot, named or autosave, is occupied.
    pub async fn has_any(&self) -> Result<bool, PersistError> {
        Ok(self.has_autosave().await? || !self.read_saves().await?.is_empty())
    }

    /// Entries stay raw so an unreadable one survives rewrites of the rest.
    async fn read_saves(&self) -> Result<IndexMap<String, Value>, PersistError> {
        match self.slots.read(SAVES_KEY).await? {
            Some(content) => decode(SAVES_KEY, &content),
            None => Ok(IndexMap::new()),
        }
    }

    async fn write_saves(&self, saves: &IndexMap<String, Value>) -> Result<(), PersistError> {
        let content = serde_json::to_string(saves)?;
        self.slots.write(SAVES_KEY, &content).await
    }
}

fn decode<T: for<'de> Deserialize<'de>>(key: &str, content: &str) -> Result<T, PersistError> {
    serde_json::from_str(content).map_err(|e| PersistError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
