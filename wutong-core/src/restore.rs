//! Normalization of saved session payloads.
//!
//! Saves written by older clients carry the session body in different shapes:
//! flat `{history, currentState}`, nested one level deeper under
//! `sessionData`, or without any history at all (for instance the
//! `{sessionId, story, choiceHistory}` view the server hands out). Every one
//! of them is resolved here into a single [`SessionRecord`], degrading to a
//! historyless session rather than failing.

use crate::error::SessionError;
use crate::provider::Turn;
use crate::store::{ChoiceRecord, SessionRecord};
use crate::story::StoryUnit;
use chrono::Utc;
use serde_json::{Map, Value};

/// The known payload shapes, after the nesting level has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RestorePayload {
    /// `{history, currentState, choices?}`.
    Flat(Map<String, Value>),
    /// `{sessionData: {history, currentState}}`; holds the inner body.
    Nested(Map<String, Value>),
    /// A body without a `history` array.
    Historyless {
        body: Map<String, Value>,
        /// The outer object when `body` was unwrapped from it.
        outer: Option<Map<String, Value>>,
    },
}

impl RestorePayload {
    /// Classify a raw payload. Only non-objects are rejected.
    pub fn classify(payload: Value) -> Result<Self, SessionError> {
        let Value::Object(mut outer) = payload else {
            return Err(SessionError::InvalidPayload(
                "session data must be a JSON object".to_string(),
            ));
        };

        let nested = match outer.get("sessionData") {
            Some(Value::Object(inner)) if looks_like_session_body(inner) => Some(inner.clone()),
            _ => None,
        };

        Ok(match nested {
            Some(body) if has_history(&body) => RestorePayload::Nested(body),
            Some(body) => {
                outer.remove("sessionData");
                RestorePayload::Historyless {
                    body,
                    outer: Some(outer),
                }
            }
            None if has_history(&outer) => RestorePayload::Flat(outer),
            None => RestorePayload::Historyless {
                body: outer,
                outer: None,
            },
        })
    }

    /// Short name of the shape, for logs.
    pub fn shape(&self) -> &'static str {
        match self {
            RestorePayload::Flat(_) => "flat",
            RestorePayload::Nested(_) => "nested",
            RestorePayload::Historyless { .. } => "historyless",
        }
    }

    /// Resolve into a canonical record.
    ///
    /// Fails only when no `currentState` (or legacy `story`) decodes as a
    /// story unit.
    pub fn into_record(self) -> Result<SessionRecord, SessionError> {
        match self {
            RestorePayload::Flat(body) | RestorePayload::Nested(body) => {
                let current_state = current_state_of(&body)?;
                Ok(SessionRecord {
                    history: history_of(&body),
                    current_state,
                    choices: choices_of(&body),
                    timestamp: Utc::now(),
                })
            }
            RestorePayload::Historyless { body, outer } => {
                let current_state = current_state_of(&body).or_else(|err| match &outer {
                    Some(outer) => current_state_of(outer),
                    None => Err(err),
                })?;
                Ok(SessionRecord {
                    history: Vec::new(),
                    current_state,
                    choices: choices_of(&body),
                    timestamp: Utc::now(),
                })
            }
        }
    }
}

/// Turn any known payload shape into a restorable record.
pub fn normalize(payload: Value) -> Result<SessionRecord, SessionError> {
    let payload = RestorePayload::classify(payload)?;
    let shape = payload.shape();
    let record = payload.into_record()?;
    tracing::debug!(
        shape,
        history = record.history.len(),
        choices = record.choices.len(),
        "Normalized session payload"
    );
    Ok(record)
}

/// The canonical `{history, currentState, choices}` body for a record.
pub fn session_body(record: &SessionRecord) -> Value {
    serde_json::json!({
        "history": record.history,
        "currentState": record.current_state,
        "choices": record.choices,
    })
}

fn looks_like_session_body(body: &Map<String, Value>) -> bool {
    ["history", "currentState", "story"]
        .iter()
        .any(|key| body.contains_key(*key))
}

fn has_history(body: &Map<String, Value>) -> bool {
    matches!(body.get("history"), Some(Value::Array(_)))
}

/// Decodable turns of the history; anything else is dropped.
fn history_of(body: &Map<String, Value>) -> Vec<Turn> {
    let Some(Value::Array(turns)) = body.get("history") else {
        return Vec::new();
    };

    let history: Vec<Turn> = turns
        .iter()
        .filter_map(|turn| serde_json::from_value(turn.clone()).ok())
        .collect();

    if history.len() < turns.len() {
        tracing::warn!(
            dropped = turns.len() - history.len(),
            kept = history.len(),
            "Dropped undecodable history turns during restore"
        );
    }
    history
}

fn current_state_of(body: &Map<String, Value>) -> Result<StoryUnit, SessionError> {
    let candidate = body
        .get("currentState")
        .filter(|v| !v.is_null())
        .or_else(|| body.get("story").filter(|v| !v.is_null()))
        .ok_or_else(|| SessionError::InvalidPayload("no currentState to restore".to_string()))?;

    serde_json::from_value(candidate.clone())
        .map_err(|e| SessionError::InvalidPayload(format!("currentState is not a story unit: {e}")))
}

/// Decodable choice log entries; anything else is dropped.
///
/// Historyless saves sometimes carry journal entries here, which decode
/// because they share the `choice` and `timestamp` fields.
fn choices_of(body: &Map<String, Value>) -> Vec<ChoiceRecord> {
    let Some(Value::Array(entries)) = body.get("choices") else {
        return Vec::new();
    };

    let choices: Vec<ChoiceRecord> = entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect();

    if choices.len() < entries.len() {
        tracing::warn!(
            dropped = entries.len() - choices.len(),
            "Dropped undecodable choice log entries during restore"
        );
    }
    choices
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valley() -> Value {
        json!({
            "narrative": "The valley hums.",
            "choices": ["a", "b", "c", "d"],
            "metadata": {"location": "Valley", "dreamState": "dreaming", "atmosphere": "eerie"}
        })
    }

    fn turns() -> Value {
        json!([
            {"role": "user", "content": "Player chose: \"go north\""},
            {"role": "assistant", "content": "{...}"}
        ])
    }

    #[test]
    fn test_flat_payload() {
        let payload = json!({"history": turns(), "currentState": valley()});
        let classified = RestorePayload::classify(payload.clone()).unwrap();
        assert_eq!(classified.shape(), "flat");

        let record = normalize(payload).unwrap();
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.current_state.location(), "Valley");
    }

    #[test]
    fn test_nested_payload() {
        let payload = json!({
            "sessionId": "abc",
            "sessionData": {"history": turns(), "currentState": valley()}
        });
        assert_eq!(RestorePayload::classify(payload.clone()).unwrap().shape(), "nested");

        let record = normalize(payload).unwrap();
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.current_state.narrative, "The valley hums.");
    }

    #[test]
    fn test_historyless_payload() {
        let payload = json!({"currentState": valley()});
        assert_eq!(RestorePayload::classify(payload.clone()).unwrap().shape(), "historyless");

        let record = normalize(payload).unwrap();
        assert!(record.history.is_empty());
        assert!(record.choices.is_empty());
        assert_eq!(record.current_state.location(), "Valley");
    }

    #[test]
    fn test_session_view_payload_uses_story() {
        // The shape `GET /api/session/:id` returns.
        let payload = json!({
            "sessionId": "abc",
            "story": valley(),
            "choiceHistory": [],
            "timestamp": "2100-01-01T00:00:00Z"
        });
        let record = normalize(payload).unwrap();
        assert!(record.history.is_empty());
        assert_eq!(record.current_state.location(), "Valley");
    }

    #[test]
    fn test_nested_historyless_falls_back_to_outer_state() {
        let payload = json!({
            "sessionData": {"story": null, "choiceHistory": []},
            "currentState": valley()
        });
        let record = normalize(payload).unwrap();
        assert_eq!(record.current_state.location(), "Valley");
    }

    #[test]
    fn test_malformed_history_degrades() {
        let payload = json!({"history": "not turns", "currentState": valley()});
        assert_eq!(RestorePayload::classify(payload.clone()).unwrap().shape(), "historyless");
        assert!(normalize(payload).unwrap().history.is_empty());
    }

    #[test]
    fn test_undecodable_turns_keep_the_rest() {
        let mut history: Vec<Value> = (0..20)
            .flat_map(|n| {
                [
                    json!({"role": "user", "content": format!("Player chose: \"{n}\"")}),
                    json!({"role": "assistant", "content": "{...}"}),
                ]
            })
            .collect();
        history.push(json!({"role": "system", "content": "be kind"}));
        history.push(json!({"role": "user", "content": 7}));

        let payload = json!({"history": history, "currentState": valley()});
        assert_eq!(RestorePayload::classify(payload.clone()).unwrap().shape(), "flat");

        let nested = json!({"sessionData": {"history": history, "currentState": valley()}});
        assert_eq!(RestorePayload::classify(nested.clone()).unwrap().shape(), "nested");

        assert_eq!(normalize(payload).unwrap().history.len(), 40);
        assert_eq!(normalize(nested).unwrap().history.len(), 40);
    }

    #[test]
    fn test_journal_entries_as_choices() {
        let payload = json!({
            "currentState": valley(),
            "choices": [
                {"step": 1, "choice": "go north", "location": "Valley", "timestamp": "2100-01-01T00:00:00Z"},
                {"garbage": true}
            ]
        });
        let record = normalize(payload).unwrap();
        assert_eq!(record.choices.len(), 1);
        assert_eq!(record.choices[0].choice, "go north");
    }

    #[test]
    fn test_missing_current_state_is_invalid() {
        let err = normalize(json!({"history": turns()})).unwrap_err();
        assert!(matches!(err, SessionError::InvalidPayload(_)));

        let err = normalize(json!({"currentState": {}})).unwrap_err();
        assert!(matches!(err, SessionError::InvalidPayload(_)));
    }

    #[test]
    fn test_non_object_is_invalid() {
        assert!(matches!(
            normalize(json!("nope")),
            Err(SessionError::InvalidPayload(_))
        ));
        assert!(matches!(normalize(Value::Null), Err(SessionError::InvalidPayload(_))));
    }

    #[test]
    fn test_canonical_body_is_flat() {
        let record = normalize(json!({"history": turns(), "currentState": valley()})).unwrap();
        let body = session_body(&record);
        assert_eq!(RestorePayload::classify(body.clone()).unwrap().shape(), "flat");
        assert_eq!(normalize(body).unwrap().history, record.history);
    }
}
