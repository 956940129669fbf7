//! Session engine for WuTong Mountain, an AI-narrated journey.
//!
//! This crate provides:
//! - The server-side session lifecycle (start, advance, restore) over a
//!   pluggable narrative provider
//! - Normalization of saved session payloads written in older shapes
//! - Client-side journey orchestration with a journal, autosave and named saves
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wutong_core::{ClaudeProvider, Journey, PersistenceManager, FileSlots,
//!     SessionController, SessionStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = ClaudeProvider::from_env(wutong_core::provider::DEFAULT_MODEL)?;
//!     let controller = SessionController::new(Arc::new(SessionStore::new()), Arc::new(provider));
//!
//!     let saves = PersistenceManager::new(Arc::new(FileSlots::new("saves")));
//!     let (mut journey, _status) = Journey::new(Arc::new(controller), saves);
//!
//!     let story = journey.start().await?;
//!     println!("{}", story.narrative);
//!
//!     let entry = journey.choose(0).await?;
//!     println!("Step {} at {}", entry.step, entry.location);
//!
//!     journey.save("At the gate").await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod controller;
pub mod error;
pub mod journal;
pub mod journey;
pub mod persist;
pub mod provider;
pub mod remote;
pub mod restore;
pub mod store;
pub mod story;
pub mod testing;

// Primary public API
pub use api::{SessionApi, SessionView};
pub use controller::{ControllerConfig, SessionController, StartedSession};
pub use error::SessionError;
pub use journal::{JournalEntry, JourneyJournal};
pub use journey::{Journey, JourneyError, StatusEvent};
pub use persist::{FileSlots, MemorySlots, PersistError, PersistedSnapshot, PersistenceManager};
pub use provider::{ClaudeProvider, NarrativeProvider, ProviderError, Turn};
pub use remote::RemoteSession;
pub use store::{SessionRecord, SessionStore};
pub use story::{DreamState, StoryUnit};
pub use testing::ScriptedProvider;
