//! Testing utilities.
//!
//! - `ScriptedProvider` for deterministic tests without API calls
//! - `story_json` for building provider output
//! - `MemorySlots` re-exported for throwaway client storage

use crate::provider::{NarrativeProvider, ProviderError, Turn};
use crate::story::DreamState;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use crate::persist::MemorySlots;

/// What a scripted provider does on one call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Return this raw text.
    Text(String),
    /// Fail as if the provider could not be reached.
    Unavailable(String),
}

/// One call the provider received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub system: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<ScriptedResponse>,
    calls: Vec<ProviderCall>,
}

/// A provider that replays queued responses in order.
///
/// Clones share the same queue and call log, so a test can keep one clone
/// for inspection while the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    /// Create a provider that returns `responses` as raw text, in order.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::default();
        for response in responses {
            provider.push(response);
        }
        provider
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a raw text response.
    pub fn push(&self, response: impl Into<String>) {
        self.lock()
            .responses
            .push_back(ScriptedResponse::Text(response.into()));
    }

    /// Queue a connectivity failure.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.lock()
            .responses
            .push_back(ScriptedResponse::Unavailable(reason.into()));
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NarrativeProvider for ScriptedProvider {
    async fn continue_story(&self, system: &str, turns: &[Turn]) -> Result<String, ProviderError> {
        let next = {
            let mut script = self.lock();
            script.calls.push(ProviderCall {
                system: system.to_string(),
                turns: turns.to_vec(),
            });
            script.responses.pop_front()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match next {
            Some(ScriptedResponse::Text(text)) => Ok(text),
            Some(ScriptedResponse::Unavailable(reason)) => Err(ProviderError::Unavailable(reason)),
            None => Err(ProviderError::Unavailable(
                "no scripted responses left".to_string(),
            )),
        }
    }
}

/// Provider output for a four-choice story unit.
pub fn story_json(narrative: &str, location: &str, dream_state: DreamState) -> String {
    serde_json::json!({
        "narrative": narrative,
        "choices": [
            format!("{location}: first path"),
            format!("{location}: second path"),
            format!("{location}: third path"),
            format!("{location}: fourth path"),
        ],
        "metadata": {
            "location": location,
            "dreamState": dream_state,
            "atmosphere": "mist",
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::parse_story_unit;

    #[tokio::test]
    async fn test_scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new(["one", "two"]);
        provider.push_failure("offline");

        assert_eq!(provider.continue_story("s", &[]).await.unwrap(), "one");
        assert_eq!(provider.continue_story("s", &[]).await.unwrap(), "two");
        assert!(matches!(
            provider.continue_story("s", &[]).await,
            Err(ProviderError::Unavailable(reason)) if reason == "offline"
        ));
        assert!(provider.continue_story("s", &[]).await.is_err());
        assert_eq!(provider.calls().len(), 4);
        assert_eq!(provider.remaining(), 0);
    }

    #[test]
    fn test_story_json_parses() {
        let unit = parse_story_unit(&story_json("n", "Tea house", DreamState::Dreaming)).unwrap();
        assert_eq!(unit.location(), "Tea house");
        assert!(unit.dream_state().is_dreaming());
        assert_eq!(unit.choices.len(), 4);
    }
}
