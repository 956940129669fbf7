//! Integration tests for autosave, named saves and resuming journeys.
//!
//! Saves go to a temporary directory through `FileSlots`, the same storage
//! the headless player uses.

use std::sync::Arc;
use tempfile::TempDir;
use wutong_core::persist::{AUTOSAVE_DISPLAY_NAME, AUTOSAVE_KEY, SAVES_KEY};
use wutong_core::testing::story_json;
use wutong_core::{
    DreamState, FileSlots, Journey, JourneyError, PersistError, PersistenceManager,
    ScriptedProvider, SessionController, SessionError, SessionStore, StatusEvent,
};

struct Harness {
    _dir: TempDir,
    slots: FileSlots,
    provider: ScriptedProvider,
    controller: SessionController,
    journey: Journey,
    events: tokio::sync::mpsc::UnboundedReceiver<StatusEvent>,
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let slots = FileSlots::new(dir.path());
    let provider = ScriptedProvider::default();
    let controller =
        SessionController::new(Arc::new(SessionStore::new()), Arc::new(provider.clone()));
    let saves = PersistenceManager::new(Arc::new(slots.clone()));
    let (journey, events) = Journey::new(Arc::new(controller.clone()), saves);
    Harness {
        _dir: dir,
        slots,
        provider,
        controller,
        journey,
        events,
    }
}

impl Harness {
    /// Queue `count` story units alternating between dreaming and waking.
    fn script(&self, count: usize) {
        for n in 0..count {
            let state = if n % 2 == 0 {
                DreamState::Dreaming
            } else {
                DreamState::Waking
            };
            self.provider
                .push(story_json("The path bends.", &format!("Bend {n}"), state));
        }
    }

    fn manager(&self) -> PersistenceManager {
        PersistenceManager::new(Arc::new(self.slots.clone()))
    }
}

#[tokio::test]
async fn test_save_load_round_trip() {
    let mut h = harness();
    h.script(3);

    h.journey.start().await.unwrap();
    for _ in 0..3 {
        h.journey.choose(0).await.unwrap();
    }
    let story = h.journey.story().unwrap().clone();
    let entries = h.journey.journal().unwrap().entries().to_vec();
    let steps = h.journey.journal().unwrap().step_count();
    let dreams = h.journey.journal().unwrap().dream_count();
    assert_eq!((steps, dreams), (3, 2));

    h.journey.save("three bends").await.unwrap();

    // A fresh client over the same storage and server.
    let (mut resumed, _events) = Journey::new(Arc::new(h.controller.clone()), h.manager());
    let loaded = resumed.load("three bends").await.unwrap().clone();
    resumed.settle().await;

    let journal = resumed.journal().unwrap();
    assert_eq!(loaded, story);
    assert_eq!(journal.entries(), entries.as_slice());
    assert_eq!(journal.step_count(), steps);
    assert_eq!(journal.dream_count(), dreams);
}

#[tokio::test]
async fn test_autosave_tracks_every_step() {
    let mut h = harness();
    h.script(2);

    h.journey.start().await.unwrap();
    h.journey.choose(2).await.unwrap();
    h.journey.choose(3).await.unwrap();
    h.journey.settle().await;

    assert!(h.slots.path_for(AUTOSAVE_KEY).exists());
    let autosave = h.manager().load_autosave().await.unwrap().unwrap();
    assert_eq!(autosave.step_count, 2);
    assert_eq!(autosave.location, "Bend 1");
    assert_eq!(autosave.journal_entries.len(), 2);
    assert_eq!(
        autosave.session_data["history"].as_array().unwrap().len(),
        4
    );

    let mut autosaved = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let StatusEvent::Autosaved { step, .. } = event {
            autosaved.push(step);
        }
    }
    assert_eq!(autosaved, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_load_rewrites_autosave() {
    let mut h = harness();
    h.script(2);

    h.journey.start().await.unwrap();
    let session_id = h.journey.session_id().unwrap().to_string();
    h.journey.choose(0).await.unwrap();
    h.journey.save("first bend").await.unwrap();
    h.journey.choose(0).await.unwrap();
    h.journey.settle().await;
    assert_eq!(h.manager().load_autosave().await.unwrap().unwrap().step_count, 2);

    h.journey.load("first bend").await.unwrap();
    h.journey.settle().await;

    let autosave = h.manager().load_autosave().await.unwrap().unwrap();
    assert_eq!(autosave.step_count, 1);
    assert_eq!(autosave.session_id, session_id);
    assert_eq!(autosave.location, "Bend 0");
    assert_eq!(autosave.journal_entries.len(), 1);
    assert_eq!(
        autosave.session_data["history"].as_array().unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_continue_from_autosave_after_restart() {
    let mut h = harness();
    h.script(2);

    h.journey.start().await.unwrap();
    h.journey.choose(0).await.unwrap();
    h.journey.settle().await;
    let session_id = h.journey.session_id().unwrap().to_string();

    // The server forgot everything; the autosave brings the session back.
    let controller =
        SessionController::new(Arc::new(SessionStore::new()), Arc::new(h.provider.clone()));
    let (mut resumed, _events) = Journey::new(Arc::new(controller.clone()), h.manager());
    resumed.load_autosave().await.unwrap();

    assert_eq!(resumed.session_id(), Some(session_id.as_str()));
    assert_eq!(controller.snapshot(&session_id).await.unwrap().history.len(), 2);

    let entry = resumed.choose(1).await.unwrap();
    assert_eq!(entry.step, 2);
    assert_eq!(controller.snapshot(&session_id).await.unwrap().history.len(), 4);
}

#[tokio::test]
async fn test_delete_keeps_autosave_and_session() {
    let mut h = harness();
    h.script(1);

    h.journey.start().await.unwrap();
    h.journey.choose(0).await.unwrap();
    h.journey.save("keep").await.unwrap();
    h.journey.save("drop").await.unwrap();
    h.journey.settle().await;

    assert!(h.journey.delete_save("drop").await.unwrap());

    let titles: Vec<String> = h
        .journey
        .list_saves()
        .await
        .unwrap()
        .into_iter()
        .map(|listing| listing.title)
        .collect();
    assert_eq!(titles, vec!["keep".to_string(), AUTOSAVE_DISPLAY_NAME.to_string()]);

    let session_id = h.journey.session_id().unwrap();
    assert!(h.controller.store().contains(session_id).await);
    assert_eq!(h.journey.journal().unwrap().step_count(), 1);
}

#[tokio::test]
async fn test_title_collision_overwrites() {
    let mut h = harness();
    h.script(1);

    h.journey.start().await.unwrap();
    assert!(!h.journey.save("same").await.unwrap().replaced);
    h.journey.choose(0).await.unwrap();
    assert!(h.journey.save("same").await.unwrap().replaced);

    let snapshot = h.manager().named("same").await.unwrap().unwrap();
    assert_eq!(snapshot.step_count, 1);
}

#[tokio::test]
async fn test_reserved_title_rejected() {
    let mut h = harness();
    h.journey.start().await.unwrap();

    let err = h.journey.save(AUTOSAVE_DISPLAY_NAME).await.unwrap_err();
    assert!(matches!(
        err,
        JourneyError::Persist(PersistError::ReservedTitle(_))
    ));
}

#[tokio::test]
async fn test_unusable_save_is_preserved() {
    let mut h = harness();
    h.script(1);
    h.journey.start().await.unwrap();
    h.journey.choose(0).await.unwrap();
    h.journey.settle().await;
    let session_id = h.journey.session_id().unwrap().to_string();

    // A save whose session body carries no story unit at all.
    let broken = serde_json::json!({
        "broken": {
            "sessionId": "elsewhere",
            "sessionData": {"history": []},
            "journalEntries": [],
            "stepCount": 0,
            "dreamCount": 0,
            "savedAt": "2024-01-01T00:00:00Z",
            "location": "Nowhere"
        }
    });
    std::fs::write(h.slots.path_for(SAVES_KEY), broken.to_string()).unwrap();

    let err = h.journey.load("broken").await.unwrap_err();
    assert!(matches!(
        err,
        JourneyError::Session(SessionError::InvalidPayload(_))
    ));

    // The journey in progress and the offending save both survive.
    assert_eq!(h.journey.session_id(), Some(session_id.as_str()));
    assert_eq!(h.journey.journal().unwrap().step_count(), 1);
    assert!(h.manager().named("broken").await.unwrap().is_some());
    assert!(!h.controller.store().contains("elsewhere").await);
}
