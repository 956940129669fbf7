//! Session orchestration: start, advance, snapshot and restore.

use crate::error::SessionError;
use crate::provider::{NarrativeProvider, ProviderError, Turn};
use crate::restore;
use crate::store::{ChoiceRecord, SessionRecord, SessionStore};
use crate::story::{parse_story_unit, StoryUnit, SYSTEM_PROMPT};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound on one provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(90);

/// Configuration for the session controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long an advance waits on the provider before giving up.
    pub provider_timeout: Duration,

    /// Instruction sent ahead of the turn history.
    pub system_prompt: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// A newly started session. Also the body of `POST /api/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_id: String,
    pub story: StoryUnit,
}

/// The prompt submitted to the provider for a choice.
pub fn choice_prompt(choice: &str) -> String {
    format!(
        "The player chose: \"{choice}\"\n\nGenerate the next story segment with 4 new choices. \
         Return ONLY valid JSON matching the specified format."
    )
}

/// The player turn recorded in history for a choice.
pub fn recorded_choice(choice: &str) -> String {
    format!("Player chose: \"{choice}\"")
}

/// Drives sessions through the store and the narrative provider.
///
/// Cheap to clone; clones share the same store and provider.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<SessionStore>,
    provider: Arc<dyn NarrativeProvider>,
    config: ControllerConfig,
}

impl SessionController {
    pub fn new(store: Arc<SessionStore>, provider: Arc<dyn NarrativeProvider>) -> Self {
        Self {
            store,
            provider,
            config: ControllerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start a fresh session at the opening unit.
    pub async fn start(&self) -> StartedSession {
        let (session_id, record) = self.store.create().await;
        tracing::info!(session_id = %session_id, "Journey started");
        StartedSession {
            session_id,
            story: record.current_state,
        }
    }

    /// Apply a player choice and obtain the next story unit.
    ///
    /// The session stays locked for the whole call, provider round trip
    /// included, so overlapping advances on one session run one after the
    /// other. The record is only touched once the provider output parsed.
    pub async fn advance(
        &self,
        session_id: &str,
        choice: &str,
        choice_index: usize,
    ) -> Result<StoryUnit, SessionError> {
        let handle = self.store.handle(session_id).await?;
        let mut record = handle.lock().await;

        let mut turns = record.history.clone();
        turns.push(Turn::user(choice_prompt(choice)));

        let raw = self.call_provider(session_id, &turns).await?;

        let story = parse_story_unit(&raw).map_err(|failure| {
            tracing::warn!(session_id = %session_id, %failure, "Provider output unusable");
            SessionError::MalformedNarrative(failure.to_string())
        })?;

        record.history.push(Turn::user(recorded_choice(choice)));
        record.history.push(Turn::assistant(raw));
        record.choices.push(ChoiceRecord {
            choice: choice.to_string(),
            choice_index,
            timestamp: Utc::now(),
        });
        record.current_state = story.clone();
        record.timestamp = Utc::now();

        tracing::info!(
            session_id = %session_id,
            step = record.choices.len(),
            location = %story.location(),
            dream_state = ?story.dream_state(),
            "Session advanced"
        );
        Ok(story)
    }

    async fn call_provider(&self, session_id: &str, turns: &[Turn]) -> Result<String, SessionError> {
        let timeout = self.config.provider_timeout;
        let call = self
            .provider
            .continue_story(&self.config.system_prompt, turns);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(err)) => {
                tracing::error!(session_id = %session_id, error = %err, "Provider call failed");
                Err(err.into())
            }
            Err(_) => {
                tracing::error!(session_id = %session_id, ?timeout, "Provider call timed out");
                Err(ProviderError::Timeout(timeout).into())
            }
        }
    }

    /// A copy of the session's record, for persistence.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        self.store.get(session_id).await
    }

    /// Replace (or create) the session from a saved payload of unknown shape.
    ///
    /// Returns the restored current story unit.
    pub async fn restore(
        &self,
        session_id: &str,
        session_data: Value,
    ) -> Result<StoryUnit, SessionError> {
        let record = restore::normalize(session_data).inspect_err(|err| {
            tracing::warn!(session_id = %session_id, error = %err, "Rejected restore payload");
        })?;
        let story = record.current_state.clone();
        let history = record.history.len();

        self.store.replace(session_id, record).await;
        tracing::info!(session_id = %session_id, history, "Session restored");
        Ok(story)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    const VALLEY: &str = r#"{"narrative":"...","choices":["a","b","c","d"],"metadata":{"location":"Valley","dreamState":"dreaming","atmosphere":"eerie"}}"#;

    fn controller(provider: ScriptedProvider) -> SessionController {
        SessionController::new(Arc::new(SessionStore::new()), Arc::new(provider))
    }

    #[test]
    fn test_prompts() {
        assert_eq!(recorded_choice("go north"), "Player chose: \"go north\"");
        assert!(choice_prompt("go north").starts_with("The player chose: \"go north\"\n\n"));
        assert!(choice_prompt("go north").ends_with("matching the specified format."));
    }

    #[tokio::test]
    async fn test_advance_appends_two_turns() {
        let provider = ScriptedProvider::new([VALLEY]);
        let controller = controller(provider.clone());
        let started = controller.start().await;

        let story = controller.advance(&started.session_id, "go north", 0).await.unwrap();
        assert_eq!(story.location(), "Valley");

        let record = controller.snapshot(&started.session_id).await.unwrap();
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[0], Turn::user("Player chose: \"go north\""));
        assert_eq!(record.history[1], Turn::assistant(VALLEY));
        assert_eq!(record.choices.len(), 1);
        assert_eq!(record.choices[0].choice, "go north");
        assert_eq!(record.current_state, story);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system, SYSTEM_PROMPT);
        assert_eq!(calls[0].turns, vec![Turn::user(choice_prompt("go north"))]);
    }

    #[tokio::test]
    async fn test_advance_sends_full_history() {
        let provider = ScriptedProvider::new([VALLEY, VALLEY]);
        let controller = controller(provider.clone());
        let id = controller.start().await.session_id;

        controller.advance(&id, "go north", 0).await.unwrap();
        controller.advance(&id, "listen", 1).await.unwrap();

        let second = &provider.calls()[1];
        assert_eq!(second.turns.len(), 3);
        assert_eq!(second.turns[2], Turn::user(choice_prompt("listen")));
    }

    #[tokio::test]
    async fn test_timeout_is_provider_unavailable() {
        let provider = ScriptedProvider::new([VALLEY]).with_delay(Duration::from_secs(5));
        let controller = controller(provider)
            .with_config(ControllerConfig::default().with_provider_timeout(Duration::from_millis(20)));
        let id = controller.start().await.session_id;

        let err = controller.advance(&id, "wait", 0).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProviderUnavailable(ProviderError::Timeout(_))
        ));
        assert!(err.is_retryable());
        assert!(controller.snapshot(&id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_restore_returns_story() {
        let controller = controller(ScriptedProvider::new(Vec::<String>::new()));
        let story = controller
            .restore(
                "from-save",
                serde_json::json!({"currentState": serde_json::from_str::<Value>(VALLEY).unwrap()}),
            )
            .await
            .unwrap();
        assert_eq!(story.location(), "Valley");
        assert!(controller.store().contains("from-save").await);
    }
}
