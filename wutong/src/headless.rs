//! Line protocol for playing a journey.
//!
//! - A number from 1 to 4 takes that choice
//! - Lines starting with `#` are commands (see `#help`)
//! - Anything else is offered to the mountain as a free-form choice
//!
//! Output lines are tagged (`[STORY]`, `[AUTOSAVE]`, `[ERROR]`, ...) so the
//! transcript is easy to follow by eye and to parse.

use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use wutong_core::journal::{spawn_elapsed_ticker, ELAPSED_REFRESH};
use wutong_core::persist::SaveListing;
use wutong_core::{
    DreamState, JournalEntry, Journey, PersistenceManager, SessionApi, StatusEvent, StoryUnit,
};

/// One line of player input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Take the choice at this zero-based index.
    Choose(usize),
    /// Offer free text as the choice.
    Say(String),
    New,
    Continue,
    Save(String),
    Load(String),
    Delete(String),
    List,
    Journal,
    Status,
    Help,
    Quit,
    Unknown(String),
}

/// Parse a line of input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('#') else {
        return Some(match line.parse::<usize>() {
            Ok(n) if n >= 1 => Command::Choose(n - 1),
            _ => Command::Say(line.to_string()),
        });
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let titled = |make: fn(String) -> Command| {
        if arg.is_empty() {
            Command::Unknown(format!("#{name} needs a title"))
        } else {
            make(arg.to_string())
        }
    };

    Some(match name {
        "new" => Command::New,
        "continue" => Command::Continue,
        "save" => titled(Command::Save),
        "load" => titled(Command::Load),
        "delete" => titled(Command::Delete),
        "list" | "saves" => Command::List,
        "journal" => Command::Journal,
        "status" => Command::Status,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(format!("Unknown command #{other}")),
    })
}

fn dream_label(state: DreamState) -> &'static str {
    match state {
        DreamState::Waking => "waking",
        DreamState::Dreaming => "dreaming",
    }
}

/// Render a story unit with numbered choices.
pub fn format_story(story: &StoryUnit) -> String {
    let mut out = format!(
        "[STORY] {} ({})\n",
        story.location(),
        dream_label(story.dream_state())
    );
    for para in story.narrative.split("\n\n") {
        out.push_str(para.trim());
        out.push_str("\n\n");
    }
    for (i, choice) in story.choices.iter().enumerate() {
        out.push_str(&format!("  {}. {choice}\n", i + 1));
    }
    out
}

fn format_entry(entry: &JournalEntry) -> String {
    format!(
        "  {:>3}. [{}] {} -> {}",
        entry.step,
        dream_label(entry.dream_state),
        entry.choice,
        entry.location
    )
}

fn format_listing(listing: &SaveListing) -> String {
    format!(
        "  {} | {} | step {} | dreams {} | {}",
        listing.title,
        listing.location,
        listing.step_count,
        listing.dream_count,
        listing.saved_at.format("%Y-%m-%d %H:%M")
    )
}

/// Render a status event as a transcript line.
pub fn format_event(event: &StatusEvent) -> String {
    match event {
        StatusEvent::Autosaved { step, .. } => format!("[AUTOSAVE] Saved at step {step}"),
        StatusEvent::AutosaveFailed { reason } => format!("[ERROR] Autosave failed: {reason}"),
        StatusEvent::Saved { title, replaced } if *replaced => {
            format!("[SAVED] \"{title}\" (replaced the earlier save)")
        }
        StatusEvent::Saved { title, .. } => format!("[SAVED] \"{title}\""),
        StatusEvent::Loaded { title } => format!("[LOADED] \"{title}\""),
        StatusEvent::LoadFailed { title, reason } => {
            format!("[ERROR] Could not load \"{title}\": {reason}")
        }
        StatusEvent::Deleted { title } => format!("[DELETED] \"{title}\""),
    }
}

fn print_help() {
    println!("[HELP]");
    println!("  1-4              - Take a choice");
    println!("  #new             - Begin a new journey");
    println!("  #continue        - Resume from the autosave");
    println!("  #save <title>    - Save the journey");
    println!("  #load <title>    - Load a saved journey");
    println!("  #delete <title>  - Delete a saved journey");
    println!("  #list            - List saved journeys");
    println!("  #journal         - Show the journey so far");
    println!("  #status          - Show location, steps and time");
    println!("  #quit            - Exit");
    println!("  (anything else is offered as your choice)");
}

/// Elapsed-minute ticker for the journey on screen.
struct Clock {
    minutes: watch::Receiver<i64>,
    task: JoinHandle<()>,
}

impl Clock {
    fn follow(journey: &Journey) -> Option<Self> {
        let start = journey.journal()?.start_time();
        let (minutes, task) = spawn_elapsed_ticker(start, ELAPSED_REFRESH);
        Some(Self { minutes, task })
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Print status events as they arrive.
fn spawn_status_printer(mut events: mpsc::UnboundedReceiver<StatusEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", format_event(&event));
        }
    })
}

/// Run the line protocol on stdin/stdout until `#quit` or end of input.
pub async fn run_headless(
    api: Arc<dyn SessionApi>,
    saves: PersistenceManager,
) -> anyhow::Result<()> {
    let has_autosave = saves.has_autosave().await.unwrap_or(false);
    let (mut journey, events) = Journey::new(api, saves);
    let printer = spawn_status_printer(events);
    let mut clock: Option<Clock> = None;

    println!("=== WuTong Mountain ===");
    if has_autosave {
        println!("A journey is waiting. #continue to resume it, or #new to begin again.");
    } else {
        println!("#new to begin. #help for commands.");
    }
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Quit => {
                println!("The mountain will wait.");
                break;
            }
            Command::Help => print_help(),
            Command::Unknown(message) => println!("[ERROR] {message}. Type #help for help."),
            Command::New => match journey.start().await {
                Ok(story) => {
                    println!("{}", format_story(story));
                    clock = Clock::follow(&journey);
                }
                Err(e) => println!("[ERROR] Could not begin: {e}"),
            },
            Command::Continue => {
                if let Ok(story) = journey.load_autosave().await {
                    println!("{}", format_story(story));
                    clock = Clock::follow(&journey);
                }
            }
            Command::Load(title) => {
                if let Ok(story) = journey.load(&title).await {
                    println!("{}", format_story(story));
                    clock = Clock::follow(&journey);
                }
            }
            Command::Save(title) => {
                if let Err(e) = journey.save(&title).await {
                    println!("[ERROR] Save failed: {e}");
                }
            }
            Command::Delete(title) => match journey.delete_save(&title).await {
                Ok(true) => {}
                Ok(false) => println!("[ERROR] No save named \"{title}\""),
                Err(e) => println!("[ERROR] Delete failed: {e}"),
            },
            Command::List => match journey.list_saves().await {
                Ok(listings) if listings.is_empty() => println!("[SAVES] none"),
                Ok(listings) => {
                    println!("[SAVES]");
                    for listing in &listings {
                        println!("{}", format_listing(listing));
                    }
                }
                Err(e) => println!("[ERROR] Could not read saves: {e}"),
            },
            Command::Journal => match journey.journal() {
                Some(journal) if !journal.entries().is_empty() => {
                    println!("[JOURNAL]");
                    for entry in journal.entries() {
                        println!("{}", format_entry(entry));
                    }
                }
                Some(_) => println!("[JOURNAL] The journey has only begun."),
                None => println!("[ERROR] No journey in progress"),
            },
            Command::Status => match (journey.story(), journey.journal()) {
                (Some(story), Some(journal)) => {
                    let minutes = match &clock {
                        Some(clock) => *clock.minutes.borrow(),
                        None => journal.elapsed_minutes(Utc::now()),
                    };
                    println!("[STATUS]");
                    println!("  Location: {}", story.location());
                    println!("  State: {}", dream_label(story.dream_state()));
                    println!("  Steps: {}", journal.step_count());
                    println!("  Dreams: {}", journal.dream_count());
                    println!("  Minutes: {minutes}");
                }
                _ => println!("[ERROR] No journey in progress"),
            },
            Command::Choose(index) => advance(&mut journey, Choice::Index(index)).await,
            Command::Say(text) => advance(&mut journey, Choice::Text(text)).await,
        }
    }

    journey.settle().await;
    drop(journey);
    printer.await.ok();
    Ok(())
}

enum Choice {
    Index(usize),
    Text(String),
}

async fn advance(journey: &mut Journey, choice: Choice) {
    println!("[PROCESSING]");
    let result = match choice {
        Choice::Index(index) => journey.choose(index).await,
        Choice::Text(text) => journey.choose_text(&text, 0).await,
    };

    match result {
        Ok(_) => {
            if let Some(story) = journey.story() {
                println!("{}", format_story(story));
            }
        }
        Err(e) if is_retryable(&e) => println!("[ERROR] {e}. Try the same choice again."),
        Err(e) => println!("[ERROR] {e}"),
    }
}

fn is_retryable(err: &wutong_core::JourneyError) -> bool {
    matches!(err, wutong_core::JourneyError::Session(e) if e.is_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wutong_core::story::StoryMetadata;

    #[test]
    fn test_parse_choices() {
        assert_eq!(parse_command("1"), Some(Command::Choose(0)));
        assert_eq!(parse_command(" 4 "), Some(Command::Choose(3)));
        assert_eq!(parse_command("0"), Some(Command::Say("0".to_string())));
        assert_eq!(
            parse_command("follow the crane"),
            Some(Command::Say("follow the crane".to_string()))
        );
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("#new"), Some(Command::New));
        assert_eq!(parse_command("#quit"), Some(Command::Quit));
        assert_eq!(
            parse_command("#save  At the gate "),
            Some(Command::Save("At the gate".to_string()))
        );
        assert_eq!(
            parse_command("#load first"),
            Some(Command::Load("first".to_string()))
        );
        assert!(matches!(parse_command("#save"), Some(Command::Unknown(_))));
        assert!(matches!(parse_command("#dance"), Some(Command::Unknown(_))));
    }

    #[test]
    fn test_format_story() {
        let story = StoryUnit {
            narrative: "Mist.\n\nMore mist.".to_string(),
            choices: vec!["Climb".to_string(), "Rest".to_string()],
            metadata: StoryMetadata {
                location: "Valley".to_string(),
                dream_state: DreamState::Dreaming,
                atmosphere: "eerie".to_string(),
            },
        };
        let text = format_story(&story);
        assert!(text.starts_with("[STORY] Valley (dreaming)\n"));
        assert!(text.contains("Mist.\n\nMore mist.\n\n"));
        assert!(text.ends_with("  1. Climb\n  2. Rest\n"));
    }

    #[test]
    fn test_format_event() {
        assert_eq!(
            format_event(&StatusEvent::Autosaved {
                session_id: "abc".to_string(),
                step: 3
            }),
            "[AUTOSAVE] Saved at step 3"
        );
        assert!(format_event(&StatusEvent::Saved {
            title: "gate".to_string(),
            replaced: true
        })
        .contains("replaced"));
    }
}
