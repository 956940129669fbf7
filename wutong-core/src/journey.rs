//! Client-side journey orchestration.
//!
//! A [`Journey`] holds what the client owns: the active session id, the story
//! unit on screen, and the journal. It drives the server through a
//! [`SessionApi`] and keeps the autosave slot current after every start,
//! advance and load. Autosaves run as background tasks, chained so they land
//! in the order they were requested, and report through the status channel
//! returned by [`Journey::new`].

use crate::api::SessionApi;
use crate::error::SessionError;
use crate::journal::{JournalEntry, JourneyJournal};
use crate::persist::{PersistError, PersistedSnapshot, PersistenceManager, SaveListing, SaveOutcome};
use crate::restore;
use crate::store::ChoiceRecord;
use crate::story::StoryUnit;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors surfaced to the player.
#[derive(Debug, Error)]
pub enum JourneyError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("No journey in progress")]
    NoActiveJourney,

    #[error("Choice {index} is not available ({available} choices offered)")]
    InvalidChoice { index: usize, available: usize },

    #[error("No saved journey named \"{0}\"")]
    SaveNotFound(String),
}

/// Notifications about persistence work, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Autosaved { session_id: String, step: u32 },
    AutosaveFailed { reason: String },
    Saved { title: String, replaced: bool },
    Loaded { title: String },
    LoadFailed { title: String, reason: String },
    Deleted { title: String },
}

#[derive(Debug, Clone)]
struct ActiveJourney {
    session_id: String,
    story: StoryUnit,
    journal: JourneyJournal,
}

/// One player's journey, as the client sees it.
pub struct Journey {
    api: Arc<dyn SessionApi>,
    saves: PersistenceManager,
    active: Option<ActiveJourney>,
    status: mpsc::UnboundedSender<StatusEvent>,
    autosave: Option<JoinHandle<()>>,
}

impl Journey {
    /// Create a journey client and the receiver for its status events.
    pub fn new(
        api: Arc<dyn SessionApi>,
        saves: PersistenceManager,
    ) -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (status, events) = mpsc::unbounded_channel();
        let journey = Self {
            api,
            saves,
            active: None,
            status,
            autosave: None,
        };
        (journey, events)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// The story unit currently presented to the player.
    pub fn story(&self) -> Option<&StoryUnit> {
        self.active.as_ref().map(|a| &a.story)
    }

    pub fn journal(&self) -> Option<&JourneyJournal> {
        self.active.as_ref().map(|a| &a.journal)
    }

    pub fn saves(&self) -> &PersistenceManager {
        &self.saves
    }

    /// Begin a new journey, discarding the previous autosave.
    pub async fn start(&mut self) -> Result<&StoryUnit, JourneyError> {
        let started = self.api.start().await?;
        self.settle().await;

        if let Err(e) = self.saves.clear_autosave().await {
            tracing::warn!(error = %e, "Could not clear previous autosave");
        }

        tracing::info!(session_id = %started.session_id, "New journey");
        let active = ActiveJourney {
            session_id: started.session_id,
            story: started.story,
            journal: JourneyJournal::new(Utc::now()),
        };
        self.spawn_autosave(active.clone());

        Ok(&self.active.insert(active).story)
    }

    /// Take the choice at `index` of the current story unit.
    pub async fn choose(&mut self, index: usize) -> Result<JournalEntry, JourneyError> {
        let active = self.active.as_ref().ok_or(JourneyError::NoActiveJourney)?;
        let choice = active
            .story
            .choice(index)
            .ok_or(JourneyError::InvalidChoice {
                index,
                available: active.story.choices.len(),
            })?
            .to_string();
        self.choose_text(&choice, index).await
    }

    /// Submit a choice by text. The index is passed through unvalidated.
    pub async fn choose_text(
        &mut self,
        choice: &str,
        index: usize,
    ) -> Result<JournalEntry, JourneyError> {
        let session_id = self
            .active
            .as_ref()
            .ok_or(JourneyError::NoActiveJourney)?
            .session_id
            .clone();

        let story = self.api.advance(&session_id, choice, index).await?;

        let active = self.active.as_mut().ok_or(JourneyError::NoActiveJourney)?;
        let entry = active.journal.record(&story, choice);
        active.story = story;
        tracing::debug!(
            session_id = %session_id,
            step = entry.step,
            dreams = active.journal.dream_count(),
            "Journal updated"
        );

        let snapshot_source = active.clone();
        self.spawn_autosave(snapshot_source);
        Ok(entry)
    }

    /// Write the current journey as a named save.
    pub async fn save(&mut self, title: &str) -> Result<SaveOutcome, JourneyError> {
        let active = self.active.as_ref().ok_or(JourneyError::NoActiveJourney)?;
        let view = self.api.session(&active.session_id).await?;
        let snapshot = PersistedSnapshot::capture(
            &active.session_id,
            view.history,
            &active.story,
            &active.journal,
        );

        let outcome = self.saves.save_named(title, &snapshot).await?;
        self.notify(StatusEvent::Saved {
            title: title.to_string(),
            replaced: outcome.replaced,
        });
        Ok(outcome)
    }

    /// Resume the named save `title`.
    ///
    /// On failure the journey in progress (if any) is left as it was and the
    /// save stays in storage.
    pub async fn load(&mut self, title: &str) -> Result<&StoryUnit, JourneyError> {
        let found = self.saves.named(title).await;
        let result = match found {
            Ok(Some(snapshot)) => self.resume(snapshot).await,
            Ok(None) => Err(JourneyError::SaveNotFound(title.to_string())),
            Err(e) => Err(e.into()),
        };
        self.finish_load(title, result)
    }

    /// Resume from the autosave slot.
    pub async fn load_autosave(&mut self) -> Result<&StoryUnit, JourneyError> {
        let title = crate::persist::AUTOSAVE_DISPLAY_NAME;
        let found = self.saves.load_autosave().await;
        let result = match found {
            Ok(Some(snapshot)) => self.resume(snapshot).await,
            Ok(None) => Err(JourneyError::SaveNotFound(title.to_string())),
            Err(e) => Err(e.into()),
        };
        self.finish_load(title, result)
    }

    fn finish_load(
        &mut self,
        title: &str,
        result: Result<(), JourneyError>,
    ) -> Result<&StoryUnit, JourneyError> {
        match result {
            Ok(()) => {
                self.notify(StatusEvent::Loaded {
                    title: title.to_string(),
                });
                self.story().ok_or(JourneyError::NoActiveJourney)
            }
            Err(e) => {
                tracing::warn!(title, error = %e, "Load failed");
                self.notify(StatusEvent::LoadFailed {
                    title: title.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn resume(&mut self, snapshot: PersistedSnapshot) -> Result<(), JourneyError> {
        let mut record = restore::normalize(snapshot.session_data.clone())?;
        if record.history.is_empty() && record.choices.is_empty() {
            record.choices = snapshot
                .journal_entries
                .iter()
                .map(|entry| ChoiceRecord {
                    choice: entry.choice.clone(),
                    choice_index: 0,
                    timestamp: entry.timestamp,
                })
                .collect();
        }

        let story = self
            .api
            .restore(&snapshot.session_id, restore::session_body(&record))
            .await?;
        self.settle().await;

        let active = ActiveJourney {
            session_id: snapshot.session_id.clone(),
            story,
            journal: snapshot.journal(),
        };
        tracing::info!(
            session_id = %active.session_id,
            steps = active.journal.step_count(),
            history = record.history.len(),
            "Journey resumed"
        );

        self.spawn_autosave(active.clone());
        self.active = Some(active);
        Ok(())
    }

    /// Delete a named save. The autosave and the active journey are untouched.
    pub async fn delete_save(&mut self, title: &str) -> Result<bool, JourneyError> {
        let existed = self.saves.delete_named(title).await?;
        if existed {
            self.notify(StatusEvent::Deleted {
                title: title.to_string(),
            });
        }
        Ok(existed)
    }

    pub async fn list_saves(&self) -> Result<Vec<SaveListing>, JourneyError> {
        Ok(self.saves.list().await?)
    }

    /// Wait for every autosave started so far to finish.
    pub async fn settle(&mut self) {
        if let Some(task) = self.autosave.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Autosave task panicked");
            }
        }
    }

    fn notify(&self, event: StatusEvent) {
        // Nobody listening is fine.
        let _ = self.status.send(event);
    }

    /// Write the autosave in the background: fetch the authoritative history
    /// fresh from the server and pair it with the client's state.
    fn spawn_autosave(&mut self, source: ActiveJourney) {
        let previous = self.autosave.take();
        let api = Arc::clone(&self.api);
        let saves = self.saves.clone();
        let status = self.status.clone();

        self.autosave = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::error!(error = %e, "Autosave task panicked");
                }
            }

            let ActiveJourney {
                session_id,
                story,
                journal,
            } = source;

            let result: Result<u32, JourneyError> = async {
                let view = api.session(&session_id).await?;
                let snapshot = PersistedSnapshot::capture(&session_id, view.history, &story, &journal);
                saves.save_autosave(&snapshot).await?;
                Ok(snapshot.step_count)
            }
            .await;

            let event = match result {
                Ok(step) => StatusEvent::Autosaved { session_id, step },
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Autosave failed");
                    StatusEvent::AutosaveFailed {
                        reason: e.to_string(),
                    }
                }
            };
            let _ = status.send(event);
        }));
    }
}
