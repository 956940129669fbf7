//! The narrative provider seam.
//!
//! The provider is an opaque text-completion service: it receives the fixed
//! system instruction plus the rolling turn history and returns raw text that
//! should be, or contain, a story unit object. Parsing that text is the
//! controller's job, not the provider's.

use async_trait::async_trait;
use claude::{Claude, Message, Request};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default model for the Claude-backed provider.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default completion budget for one story segment.
pub const DEFAULT_MAX_TOKENS: usize = 2000;

/// Who spoke a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of the provider conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        match turn.role {
            TurnRole::User => Message::user(&turn.content),
            TurnRole::Assistant => Message::assistant(&turn.content),
        }
    }
}

/// Failures talking to the narrative provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unavailable(String),

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("provider rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the same request might succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Unavailable(_) | ProviderError::Timeout(_) => true,
            ProviderError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ProviderError::NotConfigured(_) => false,
        }
    }
}

impl From<claude::Error> for ProviderError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::Timeout => ProviderError::Unavailable("request timed out".to_string()),
            claude::Error::Network(message) | claude::Error::Parse(message) => {
                ProviderError::Unavailable(message)
            }
            claude::Error::Api { status, message } => ProviderError::Rejected { status, message },
            claude::Error::NoApiKey => {
                ProviderError::NotConfigured("ANTHROPIC_API_KEY is not set".to_string())
            }
            claude::Error::Config(message) => ProviderError::NotConfigured(message),
        }
    }
}

/// Something that continues the story.
#[async_trait]
pub trait NarrativeProvider: Send + Sync {
    /// Produce the raw text of the next story segment.
    async fn continue_story(&self, system: &str, turns: &[Turn]) -> Result<String, ProviderError>;
}

/// Narrative provider backed by Anthropic's Messages API.
#[derive(Clone)]
pub struct ClaudeProvider {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeProvider {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    /// Build a provider from `ANTHROPIC_API_KEY`, using `model`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Claude::from_env()?.with_model(model);
        Ok(Self::new(client))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl NarrativeProvider for ClaudeProvider {
    async fn continue_story(&self, system: &str, turns: &[Turn]) -> Result<String, ProviderError> {
        let mut request = Request::new(turns.iter().map(Message::from).collect())
            .with_system(system)
            .with_max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.client.complete(request).await?;
        tracing::debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Provider produced story segment"
        );
        Ok(response.text())
    }
}
