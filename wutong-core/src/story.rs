//! Story units: the narrative segments the player moves between.
//!
//! A [`StoryUnit`] is produced either by the narrative provider or by the
//! fixed opening constant. It is never mutated once produced; each advance
//! supersedes it with a new one.

use serde::{Deserialize, Deserializer, Serialize};

/// Maximum number of choices a story unit offers.
pub const MAX_CHOICES: usize = 4;

/// The fixed instruction sent to the narrative provider on every advance.
pub const SYSTEM_PROMPT: &str = r#"You are the narrative consciousness of WuTong Mountain, a text-based adventure where the player is Nameless - a dream doctor who lost their name to The Ten Thousand Things.

WORLD CONTEXT:
- Year: 2100, a utopian world of abundance and peace
- But: People suffer dystopian nightmares despite outer perfection
- Nameless descends from their cave on WuTong Mountain (Shenzhen) to heal these dreams
- Nameless can enter people's dreams to heal psychological wounds

NARRATIVE STYLE:
- Write in lyrical, philosophical prose with Daoist undertones
- Embrace paradox: utopia/dystopia, named/nameless, mountain/valley
- Use vivid sensory detail but maintain dreamlike ambiguity
- Let wu wei guide the flow - don't force resolution

YOUR ROLE:
- Generate story segments (150-250 words) based on player choices
- Each segment ends with EXACTLY 4 choices for the player
- Track narrative threads but allow emergence and surprise
- When Nameless enters dreams, shift register to more surreal/symbolic language
- Maintain continuity with previous choices while allowing branching

RESPONSE FORMAT:
Return JSON with this exact structure:
{
  "narrative": "The story segment text here...",
  "choices": [
    "First choice text",
    "Second choice text",
    "Third choice text",
    "Fourth choice text"
  ],
  "metadata": {
    "location": "Current location",
    "dreamState": "waking" or "dreaming",
    "atmosphere": "brief mood descriptor"
  }
}

Remember: You are not playing Nameless. You are the world responding to Nameless. The Ten Thousand Things speaking through you."#;

const OPENING_NARRATIVE: &str = "The mountain remembers your name, though you cannot.

Mist curls around the mouth of your cave like breath made visible. Below, through gaps in the clouds, Shenzhen glitters\u{2014}a constellation that crawled up from the earth to mock the stars. The year is 2100, and they say the world has finally learned to dream correctly. No hunger. No war. No lack.

But you know better. You who live between waking and sleep.

Three nights ago, the first dreamer found you.

Since then, others have come. Their utopian days haunted by dystopian nights. Something in the perfect world is cracked, and the cracks show in sleep.

You stand at the cave mouth now, the wooden staff in your hand older than your forgotten name. The mountain breeze asks a question without words.

What will Nameless do?";

const OPENING_CHOICES: [&str; 4] = [
    "Descend the northern path toward the glittering city below",
    "Seek the tea house where dreamers gather at the mountain's base",
    "Return to the cave to prepare medicinal herbs and divination tools",
    "Follow the mist itself\u{2014}let it lead where it will",
];

/// Whether Nameless is awake or walking inside someone's dream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DreamState {
    Dreaming,
    #[default]
    #[serde(other)]
    Waking,
}

impl DreamState {
    pub fn is_dreaming(self) -> bool {
        self == DreamState::Dreaming
    }
}

/// State metadata attached to every story unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMetadata {
    #[serde(default = "unknown_location", deserialize_with = "null_as_unknown")]
    pub location: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub dream_state: DreamState,

    #[serde(default, deserialize_with = "null_as_default")]
    pub atmosphere: String,
}

impl Default for StoryMetadata {
    fn default() -> Self {
        Self {
            location: unknown_location(),
            dream_state: DreamState::Waking,
            atmosphere: String::new(),
        }
    }
}

pub(crate) fn unknown_location() -> String {
    "Unknown".to_string()
}

/// Explicit `null` reads the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn null_as_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(unknown_location))
}

/// One generated segment of narrative plus its follow-up choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryUnit {
    pub narrative: String,
    pub choices: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: StoryMetadata,
}

impl StoryUnit {
    /// The fixed unit every fresh session starts from.
    pub fn opening() -> Self {
        Self {
            narrative: OPENING_NARRATIVE.to_string(),
            choices: OPENING_CHOICES.iter().map(|c| c.to_string()).collect(),
            metadata: StoryMetadata {
                location: "Cave mouth, WuTong Mountain".to_string(),
                dream_state: DreamState::Waking,
                atmosphere: "liminal dawn, mist-shrouded".to_string(),
            },
        }
    }

    pub fn location(&self) -> &str {
        &self.metadata.location
    }

    pub fn dream_state(&self) -> DreamState {
        self.metadata.dream_state
    }

    /// The text of the choice at `index`, if there is one.
    pub fn choice(&self, index: usize) -> Option<&str> {
        self.choices.get(index).map(String::as_str)
    }
}

/// Why raw provider output could not be turned into a [`StoryUnit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// Neither the whole text nor any embedded object decoded.
    NoStoryObject(String),
    /// The object decoded but offered nothing to choose.
    NoChoices,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::NoStoryObject(reason) => {
                write!(f, "could not parse story data: {reason}")
            }
            ParseFailure::NoChoices => write!(f, "story data offers no choices"),
        }
    }
}

/// Parse raw provider output into a story unit.
///
/// The whole text is tried first; if that fails, the first top-level JSON
/// object embedded in the text is tried. Units with more than
/// [`MAX_CHOICES`] choices are truncated.
pub fn parse_story_unit(raw: &str) -> Result<StoryUnit, ParseFailure> {
    let unit = match serde_json::from_str::<StoryUnit>(raw.trim()) {
        Ok(unit) => unit,
        Err(direct) => {
            let embedded = extract_first_object(raw)
                .ok_or_else(|| ParseFailure::NoStoryObject(direct.to_string()))?;
            serde_json::from_str::<StoryUnit>(embedded)
                .map_err(|e| ParseFailure::NoStoryObject(e.to_string()))?
        }
    };

    normalize_choices(unit)
}

fn normalize_choices(mut unit: StoryUnit) -> Result<StoryUnit, ParseFailure> {
    if unit.choices.is_empty() {
        return Err(ParseFailure::NoChoices);
    }
    if unit.choices.len() > MAX_CHOICES {
        tracing::warn!(
            offered = unit.choices.len(),
            kept = MAX_CHOICES,
            "Story unit offered too many choices, truncating"
        );
        unit.choices.truncate(MAX_CHOICES);
    }
    Ok(unit)
}

/// Find the first balanced top-level `{...}` in `text`.
///
/// Braces inside JSON string literals (including escaped quotes) are ignored,
/// so narrative prose containing `{` or `}` doesn't throw the match off.
pub fn extract_first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALLEY: &str = r#"{"narrative":"The valley hums.","choices":["a","b","c","d"],"metadata":{"location":"Valley","dreamState":"dreaming","atmosphere":"eerie"}}"#;

    #[test]
    fn test_opening_unit() {
        let opening = StoryUnit::opening();
        assert_eq!(opening.choices.len(), MAX_CHOICES);
        assert_eq!(opening.location(), "Cave mouth, WuTong Mountain");
        assert_eq!(opening.dream_state(), DreamState::Waking);
        assert!(opening.narrative.starts_with("The mountain remembers"));
    }

    #[test]
    fn test_parse_direct_json() {
        let unit = parse_story_unit(VALLEY).unwrap();
        assert_eq!(unit.location(), "Valley");
        assert!(unit.dream_state().is_dreaming());
        assert_eq!(unit.choice(3), Some("d"));
        assert_eq!(unit.choice(4), None);
    }

    #[test]
    fn test_parse_embedded_json() {
        let raw = format!("Here is the next segment:\n```json\n{VALLEY}\n```\nEnjoy!");
        let unit = parse_story_unit(&raw).unwrap();
        assert_eq!(unit.narrative, "The valley hums.");
    }

    #[test]
    fn test_parse_takes_first_object_only() {
        let raw = format!("{VALLEY}\n\nAlternate: {{\"narrative\":\"other\",\"choices\":[\"x\"]}}");
        let unit = parse_story_unit(&raw).unwrap();
        assert_eq!(unit.narrative, "The valley hums.");
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_story_unit("The mist obscures the path.").unwrap_err();
        assert!(matches!(err, ParseFailure::NoStoryObject(_)));
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        let err = parse_story_unit(r#"{"narrative":"silence","choices":[]}"#).unwrap_err();
        assert_eq!(err, ParseFailure::NoChoices);
    }

    #[test]
    fn test_parse_truncates_extra_choices() {
        let unit =
            parse_story_unit(r#"{"narrative":"n","choices":["1","2","3","4","5","6"]}"#).unwrap();
        assert_eq!(unit.choices, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_missing_metadata_defaults() {
        let unit = parse_story_unit(r#"{"narrative":"n","choices":["go"]}"#).unwrap();
        assert_eq!(unit.location(), "Unknown");
        assert_eq!(unit.dream_state(), DreamState::Waking);
        assert_eq!(unit.metadata.atmosphere, "");
    }

    #[test]
    fn test_unknown_dream_state_reads_as_waking() {
        let unit = parse_story_unit(
            r#"{"narrative":"n","choices":["go"],"metadata":{"location":"L","dreamState":"lucid"}}"#,
        )
        .unwrap();
        assert_eq!(unit.dream_state(), DreamState::Waking);
    }

    #[test]
    fn test_null_metadata_fields_default() {
        let unit = parse_story_unit(
            r#"{"narrative":"n","choices":["go"],"metadata":{"location":null,"dreamState":null,"atmosphere":null}}"#,
        )
        .unwrap();
        assert_eq!(unit.location(), "Unknown");
        assert_eq!(unit.dream_state(), DreamState::Waking);
        assert_eq!(unit.metadata.atmosphere, "");

        let unit = parse_story_unit(
            r#"{"narrative":"n","choices":["go"],"metadata":{"location":"Valley","dreamState":"dreaming","atmosphere":null}}"#,
        )
        .unwrap();
        assert_eq!(unit.location(), "Valley");
        assert!(unit.dream_state().is_dreaming());
    }

    #[test]
    fn test_null_metadata_defaults() {
        let unit = parse_story_unit(r#"{"narrative":"n","choices":["go"],"metadata":null}"#).unwrap();
        assert_eq!(unit.metadata, StoryMetadata::default());
    }

    #[test]
    fn test_extract_ignores_braces_in_strings() {
        let text = r#"noise {"narrative":"a } tricky \" { brace","choices":["x"]} trailing }"#;
        let object = extract_first_object(text).unwrap();
        assert!(object.ends_with(r#"["x"]}"#));
        assert!(serde_json::from_str::<StoryUnit>(object).is_ok());
    }

    #[test]
    fn test_extract_unbalanced() {
        assert_eq!(extract_first_object("{\"narrative\": \"cut off"), None);
        assert_eq!(extract_first_object("no braces here"), None);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(StoryUnit::opening()).unwrap();
        assert_eq!(json["metadata"]["dreamState"], "waking");
        assert!(json["metadata"].get("dream_state").is_none());
    }
}
