//! The journey journal: the client's append-only record of a playthrough.
//!
//! Counters are derived from the journal rather than tracked separately, so
//! they can't drift from it across save/restore cycles. Only the start time is
//! persisted for elapsed time; minutes are always recomputed.

use crate::story::{null_as_default, null_as_unknown, unknown_location, DreamState, StoryUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How often the elapsed-time ticker republishes.
pub const ELAPSED_REFRESH: Duration = Duration::from_secs(10);

/// One step of the journey, as the player saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub step: u32,
    #[serde(alias = "choiceText", deserialize_with = "null_as_default")]
    pub choice: String,
    #[serde(default = "unknown_location", deserialize_with = "null_as_unknown")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dream_state: DreamState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub narrative: String,
    #[serde(default = "Utc::now", deserialize_with = "null_as_now")]
    pub timestamp: DateTime<Utc>,
}

fn null_as_now<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<DateTime<Utc>>::deserialize(deserializer)?.unwrap_or_else(Utc::now))
}

/// Append-only journal with derived step and dream counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyJournal {
    entries: Vec<JournalEntry>,
    dream_count: u32,
    start_time: DateTime<Utc>,
}

impl JourneyJournal {
    /// An empty journal for a journey that began at `start_time`.
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            dream_count: 0,
            start_time,
        }
    }

    /// Rebuild a journal from persisted entries.
    ///
    /// Counters are recomputed from `entries`; the stored counters are only
    /// compared against them so a disagreement shows up in the logs.
    pub fn rehydrate(
        entries: Vec<JournalEntry>,
        start_time: DateTime<Utc>,
        stored_steps: u32,
        stored_dreams: u32,
    ) -> Self {
        let dream_count = entries
            .iter()
            .filter(|e| e.dream_state.is_dreaming())
            .count() as u32;
        let journal = Self {
            entries,
            dream_count,
            start_time,
        };

        if journal.step_count() != stored_steps || dream_count != stored_dreams {
            tracing::warn!(
                stored_steps,
                stored_dreams,
                steps = journal.step_count(),
                dreams = dream_count,
                "Saved counters disagree with journal entries, using the entries"
            );
        }
        journal
    }

    /// Record the result of a successful advance.
    ///
    /// Every dreaming step counts toward the dream total, not only the
    /// transitions from waking into a dream.
    pub fn record(&mut self, story: &StoryUnit, choice: &str) -> JournalEntry {
        let entry = JournalEntry {
            step: self.step_count() + 1,
            choice: choice.to_string(),
            location: story.location().to_string(),
            dream_state: story.dream_state(),
            narrative: story.narrative.clone(),
            timestamp: Utc::now(),
        };

        if entry.dream_state == DreamState::Dreaming {
            self.dream_count += 1;
        }
        self.entries.push(entry.clone());
        entry
    }

    /// Discard everything and begin a new journey.
    pub fn reset(&mut self, start_time: DateTime<Utc>) {
        self.entries.clear();
        self.dream_count = 0;
        self.start_time = start_time;
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&JournalEntry> {
        self.entries.last()
    }

    pub fn step_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn dream_count(&self) -> u32 {
        self.dream_count
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Whole minutes since the journey began.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        elapsed_minutes(self.start_time, now)
    }
}

fn elapsed_minutes(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_minutes().max(0)
}

/// Publish elapsed minutes every `period` until every receiver is gone.
pub fn spawn_elapsed_ticker(
    start_time: DateTime<Utc>,
    period: Duration,
) -> (watch::Receiver<i64>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(elapsed_minutes(start_time, Utc::now()));
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if tx.send(elapsed_minutes(start_time, Utc::now())).is_err() {
                break;
            }
        }
    });
    (rx, task)
}
