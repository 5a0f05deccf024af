//! The per-turn game state machine.
//!
//! A turn is applied to a draft copy of the session and committed only when it completes, so an
//! internal failure never leaves a half-updated session behind.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::catalog::{Catalog, Element, Room, Theme};
use crate::illustration::{ImageBackend, Illustrator};
use crate::matcher::{ELEMENT_PROBE_THRESHOLD, is_match, partial_ratio};
use crate::nlp::Normalizer;
use crate::session::{GameOverReason, Phase, STARTING_LIVES, SessionState};

pub const POINTS_PER_SOLVE: i32 = 10;
pub const HINT_COST: i32 = 5;

const WELCOME: &str = "Welcome to the Escape Room Game! 🏰 You will need to solve puzzles and riddles to progress through different rooms. Each room has its own challenge. Are you ready to begin your adventure? Type 'next' to see the available themes or 'exit' to quit.";
const SCORING_RULES: &str = "🎯 Scoring Rules:\n• For every correct answer: +10 points\n• For every hint used: -5 points\nSolve puzzles strategically and minimize hint usage!";
const NOT_ALPHANUMERIC: &str =
    "Hmm, that doesn't seem like a valid answer. Please try again with a word or phrase!";
const NOT_STARTED_USAGE: &str = "Invalid input. Type 'start' to begin or 'exit' to quit.";
const INVALID_THEME: &str = "Invalid selection. Please choose a valid theme number.";
const INVALID_ELEMENT: &str =
    "Invalid element. Please type the name of an available element or ask for a hint.";
const FAREWELL: &str = "Exiting the game. Thank you for playing!";
const GAME_OVER_USAGE: &str = "Game over. Type 'next' to start a new game or 'exit' to quit.";
const OUT_OF_LIVES: &str = "❌ Out of lives! Game restarted. Try again from the beginning.";
const APOLOGY: &str = "Something went wrong on our side. Please try that again.";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("score overflowed")]
    ScoreOverflow,
    #[error("hint counter overflowed")]
    HintOverflow,
}

/// Outcome of one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReply {
    /// `false` when the input was rejected or the answer was wrong.
    pub accepted: bool,
    pub messages: Vec<String>,
    /// Base64 PNG illustration of the element just entered.
    pub image: Option<String>,
    /// The client should drop whatever it shows for this session.
    pub reload: bool,
}

impl TurnReply {
    fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            messages: vec![message.into()],
            ..Self::default()
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            messages: vec![message.into()],
            ..Self::default()
        }
    }

    fn with_reload(mut self) -> Self {
        self.reload = true;
        self
    }

    pub fn message(&self) -> String {
        self.messages.join("\n\n")
    }

    pub fn view(&self) -> TurnView<'_> {
        TurnView {
            accepted: self.accepted,
            message: self.message(),
            messages: &self.messages,
            image: self.image.as_deref(),
            reload: self.reload,
        }
    }
}

/// Wire form of a [`TurnReply`].
#[derive(Debug, Serialize)]
pub struct TurnView<'a> {
    pub accepted: bool,
    pub message: String,
    pub messages: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<&'a str>,
    pub reload: bool,
}

enum Command {
    Start,
    Next,
    Exit,
    Other,
}

impl Command {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("start") {
            Command::Start
        } else if trimmed.eq_ignore_ascii_case("next") {
            Command::Next
        } else if trimmed.eq_ignore_ascii_case("exit") {
            Command::Exit
        } else {
            Command::Other
        }
    }
}

pub struct Engine<B> {
    catalog: Arc<Catalog>,
    normalizer: Normalizer,
    illustrator: Illustrator<B>,
}

impl<B: ImageBackend> Engine<B> {
    pub fn new(catalog: Arc<Catalog>, normalizer: Normalizer, illustrator: Illustrator<B>) -> Self {
        Self {
            catalog,
            normalizer,
            illustrator,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn illustrator(&self) -> &Illustrator<B> {
        &self.illustrator
    }

    /// Runs one player input against `state`. The state is replaced only when the turn succeeds.
    pub async fn play_turn(&self, state: &mut SessionState, raw: &str) -> TurnReply {
        if !raw.chars().any(char::is_alphanumeric) {
            return TurnReply::rejected(NOT_ALPHANUMERIC);
        }

        let mut draft = state.clone();
        match self.apply(&mut draft, raw).await {
            Ok(reply) => {
                debug!(session_id = %state.session_id, phase = ?draft.phase, "turn committed");
                *state = draft;
                reply
            }
            Err(err) => {
                error!(session_id = %state.session_id, error = %err, "turn failed, session left unchanged");
                TurnReply::rejected(APOLOGY)
            }
        }
    }

    async fn apply(&self, draft: &mut SessionState, raw: &str) -> Result<TurnReply, EngineError> {
        let command = Command::parse(raw);
        if let Command::Exit = command {
            if !draft.game_over() {
                draft.phase = Phase::GameOver {
                    reason: GameOverReason::Exited,
                };
            }
            return Ok(TurnReply::rejected(FAREWELL).with_reload());
        }

        match draft.phase.clone() {
            Phase::NotStarted => Ok(match command {
                Command::Start => {
                    draft.phase = Phase::ThemeSelection;
                    draft.restart_timer();
                    TurnReply {
                        accepted: true,
                        messages: vec![WELCOME.to_string(), SCORING_RULES.to_string()],
                        ..TurnReply::default()
                    }
                }
                _ => TurnReply::rejected(NOT_STARTED_USAGE),
            }),
            Phase::ThemeSelection => Ok(match command {
                Command::Next => TurnReply::accepted(self.theme_list()),
                _ => self.select_theme(draft, raw),
            }),
            Phase::RoomExploration { theme, room } => Ok(self.probe(draft, &theme, room, raw).await),
            Phase::ElementPuzzle {
                theme,
                room,
                element,
            } => {
                if raw.to_lowercase().contains("hint") {
                    return self.hint(draft, &theme, room, &element);
                }
                self.answer(draft, &theme, room, &element, raw)
            }
            Phase::GameOver { .. } => Ok(match command {
                Command::Next => {
                    draft.reset_progress();
                    draft.restart_timer();
                    draft.phase = Phase::ThemeSelection;
                    TurnReply::accepted(self.theme_list())
                }
                _ => TurnReply::rejected(GAME_OVER_USAGE),
            }),
        }
    }

    fn theme_list(&self) -> String {
        let items: Vec<String> = self
            .catalog
            .themes()
            .iter()
            .enumerate()
            .map(|(i, theme)| format!("{}. 🌟 **{}**", i + 1, theme.name()))
            .collect();
        format!(
            "Choose a theme to start your adventure:\n\n{}\n\nType the number of your choice to begin or 'exit' to quit.",
            items.join("\n\n")
        )
    }

    fn select_theme(&self, draft: &mut SessionState, raw: &str) -> TurnReply {
        let Some(theme) = raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| self.catalog.theme_by_number(n))
        else {
            return TurnReply::rejected(INVALID_THEME);
        };
        let Some(room) = theme.room(0) else {
            return TurnReply::rejected(INVALID_THEME);
        };
        draft.lives = STARTING_LIVES;
        draft.phase = Phase::RoomExploration {
            theme: theme.key().to_string(),
            room: 0,
        };
        TurnReply::accepted(format!(
            "{}\n\n🌟 Lives remaining: {}",
            describe_room(room),
            draft.lives
        ))
    }

    /// Resolves the theme and room a phase points at, falling back to theme selection when the
    /// content no longer has them.
    fn locate<'c>(
        &'c self,
        draft: &mut SessionState,
        theme_key: &str,
        room: usize,
    ) -> Result<(&'c Theme, &'c Room), TurnReply> {
        match self.catalog.theme(theme_key) {
            Some(theme) => match theme.room(room) {
                Some(found) => Ok((theme, found)),
                None => {
                    draft.phase = Phase::ThemeSelection;
                    Err(TurnReply::rejected(format!(
                        "Error: Room {} for theme '{theme_key}' not found. Type 'next' to see the available themes.",
                        room + 1
                    )))
                }
            },
            None => {
                draft.phase = Phase::ThemeSelection;
                Err(TurnReply::rejected(format!(
                    "Error: Room for theme '{theme_key}' not found. Type 'next' to see the available themes."
                )))
            }
        }
    }

    async fn probe(
        &self,
        draft: &mut SessionState,
        theme_key: &str,
        room_index: usize,
        raw: &str,
    ) -> TurnReply {
        let (theme, room) = match self.locate(draft, theme_key, room_index) {
            Ok(found) => found,
            Err(reply) => return reply,
        };
        let Some(element) = self.find_element(room, raw) else {
            return TurnReply::rejected(INVALID_ELEMENT);
        };
        if draft.is_solved(theme.key(), element.key()) {
            return TurnReply::accepted(format!(
                "The puzzle for the {} is already solved. Please choose another element to interact with.",
                element.name()
            ));
        }

        draft.phase = Phase::ElementPuzzle {
            theme: theme.key().to_string(),
            room: room_index,
            element: element.key().to_string(),
        };
        let image = self
            .illustrator
            .get_illustration(&draft.session_id, theme.key(), element.name(), element.puzzle())
            .await;
        TurnReply {
            accepted: true,
            messages: vec![format!(
                "Your puzzle for the {} is: {}\n\nDifficulty: {}",
                element.name(),
                element.puzzle(),
                element.difficulty()
            )],
            image: image.map(|encoded| encoded.to_string()),
            reload: false,
        }
    }

    /// Exact word hit on an element name first (in name order), then the closest partial match.
    fn find_element<'r>(&self, room: &'r Room, raw: &str) -> Option<&'r Element> {
        let input = self.normalizer.normalize(raw);
        let words: Vec<&str> = input.split_whitespace().collect();
        if let Some(hit) = room.elements().find(|e| words.contains(&e.key())) {
            return Some(hit);
        }

        let mut best: Option<(&Element, u8)> = None;
        for element in room.elements() {
            let score = partial_ratio(&input, element.key());
            if score > ELEMENT_PROBE_THRESHOLD && best.is_none_or(|(_, s)| score > s) {
                best = Some((element, score));
            }
        }
        best.map(|(element, _)| element)
    }

    fn hint(
        &self,
        draft: &mut SessionState,
        theme_key: &str,
        room: usize,
        element_key: &str,
    ) -> Result<TurnReply, EngineError> {
        let (_, room_ref) = match self.locate(draft, theme_key, room) {
            Ok(found) => found,
            Err(reply) => return Ok(reply),
        };
        let Some(element) = room_ref.element(element_key) else {
            return Ok(self.lost_element(draft, theme_key, room, element_key));
        };
        draft.score = draft
            .score
            .checked_sub(HINT_COST)
            .ok_or(EngineError::ScoreOverflow)?;
        draft.hints_used = draft
            .hints_used
            .checked_add(1)
            .ok_or(EngineError::HintOverflow)?;
        Ok(TurnReply::accepted(format!(
            "Hint for the {}: {}",
            element.name(),
            element.hint()
        )))
    }

    fn answer(
        &self,
        draft: &mut SessionState,
        theme_key: &str,
        room_index: usize,
        element_key: &str,
        raw: &str,
    ) -> Result<TurnReply, EngineError> {
        let (theme, room) = match self.locate(draft, theme_key, room_index) {
            Ok(found) => found,
            Err(reply) => return Ok(reply),
        };
        let Some(element) = room.element(element_key) else {
            return Ok(self.lost_element(draft, theme_key, room_index, element_key));
        };

        let candidate = self.normalizer.answer_form(raw);
        let correct = element
            .processed_answers()
            .iter()
            .any(|answer| is_match(answer, &candidate));
        if !correct {
            return Ok(wrong_answer(draft));
        }

        if draft.mark_solved(theme.key(), element.key()) {
            draft.score = draft
                .score
                .checked_add(POINTS_PER_SOLVE)
                .ok_or(EngineError::ScoreOverflow)?;
        }
        let unsolved: Vec<&Element> = room
            .elements()
            .filter(|e| !draft.is_solved(theme.key(), e.key()))
            .collect();

        if !unsolved.is_empty() {
            draft.phase = Phase::RoomExploration {
                theme: theme.key().to_string(),
                room: room_index,
            };
            return Ok(TurnReply::accepted(format!(
                "🎉 That's correct! {} more to solve. Choose another element to interact with. Current score: {}.\n\nRemaining elements to solve: {}",
                unsolved.len(),
                draft.score,
                element_list(unsolved.into_iter())
            )));
        }

        if let Some(next_room) = theme.room(room_index + 1) {
            draft.phase = Phase::RoomExploration {
                theme: theme.key().to_string(),
                room: room_index + 1,
            };
            return Ok(TurnReply::accepted(format!(
                "🎉 That's correct! You've cleared the {}. Current score: {}.\n\n{}",
                room.name(),
                draft.score,
                describe_room(next_room)
            )));
        }

        draft.phase = Phase::GameOver {
            reason: GameOverReason::RoomComplete,
        };
        Ok(TurnReply::accepted(format!(
            "🎉 Congratulations! You've successfully cracked the room and solved all the puzzles! Total score: {} points. Time taken: {}. Type 'next' to play another theme.",
            draft.score,
            format_elapsed(draft.elapsed())
        )))
    }

    fn lost_element(
        &self,
        draft: &mut SessionState,
        theme_key: &str,
        room: usize,
        element_key: &str,
    ) -> TurnReply {
        draft.phase = Phase::RoomExploration {
            theme: theme_key.to_string(),
            room,
        };
        TurnReply::rejected(format!(
            "Error: Element '{element_key}' not found in theme '{theme_key}'. Please choose an available element."
        ))
    }
}

fn wrong_answer(draft: &mut SessionState) -> TurnReply {
    draft.lives = draft.lives.saturating_sub(1);
    if draft.lives == 0 {
        draft.reset_progress();
        draft.phase = Phase::GameOver {
            reason: GameOverReason::OutOfLives,
        };
        return TurnReply::rejected(OUT_OF_LIVES).with_reload();
    }
    TurnReply::rejected(format!(
        "Oops! That's not quite right. 😅 Lives remaining: {}. For hint, type Hint",
        draft.lives
    ))
}

fn describe_room(room: &Room) -> String {
    format!(
        "{}\n\nInteract with: \n{}.\nType the name of an element to interact with it or 'exit' to quit.",
        room.description(),
        element_list(room.elements())
    )
}

fn element_list<'e>(elements: impl Iterator<Item = &'e Element>) -> String {
    elements
        .map(|e| format!("🔍 **{}**", e.name()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes}m {seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_content;
    use crate::illustration::tests::{ScriptedBackend, png_bytes};
    use crate::illustration::{DisabledBackend, GenerationError, RetryPolicy};

    const LABYRINTH: &str = "the forgotten labyrinth";

    fn engine() -> Engine<DisabledBackend> {
        let normalizer = Normalizer::english();
        let catalog = Arc::new(Catalog::bundled(&normalizer).unwrap());
        let illustrator = Illustrator::new(DisabledBackend, RetryPolicy::immediate(1), 8, 400);
        Engine::new(catalog, normalizer, illustrator)
    }

    async fn play(engine: &Engine<impl ImageBackend>, state: &mut SessionState, inputs: &[&str]) -> TurnReply {
        let mut last = TurnReply::default();
        for input in inputs {
            last = engine.play_turn(state, input).await;
        }
        last
    }

    fn in_puzzle(element: &str) -> SessionState {
        let mut state = SessionState::new("s");
        state.phase = Phase::ElementPuzzle {
            theme: LABYRINTH.into(),
            room: 0,
            element: element.into(),
        };
        state
    }

    #[tokio::test]
    async fn start_sends_welcome_and_rules() {
        let engine = engine();
        let mut state = SessionState::new("s");
        let reply = engine.play_turn(&mut state, "  START ").await;
        assert!(reply.accepted);
        assert_eq!(reply.messages.len(), 2);
        assert!(reply.messages[0].starts_with("Welcome to the Escape Room Game!"));
        assert!(reply.messages[1].contains("Scoring Rules"));
        assert_eq!(state.phase, Phase::ThemeSelection);
    }

    #[tokio::test]
    async fn punctuation_only_input_changes_nothing() {
        let engine = engine();
        for phase in [Phase::NotStarted, Phase::ThemeSelection, Phase::GameOver { reason: GameOverReason::Exited }] {
            let mut state = SessionState::new("s");
            state.phase = phase;
            let before = state.clone();
            let reply = engine.play_turn(&mut state, "?!  ...").await;
            assert!(!reply.accepted);
            assert_eq!(reply.message(), NOT_ALPHANUMERIC);
            assert_eq!(state, before);
        }
    }

    #[tokio::test]
    async fn unknown_command_before_start() {
        let engine = engine();
        let mut state = SessionState::new("s");
        let reply = engine.play_turn(&mut state, "hello").await;
        assert_eq!(reply.message(), NOT_STARTED_USAGE);
        assert_eq!(state.phase, Phase::NotStarted);
    }

    #[tokio::test]
    async fn theme_selection_flow() {
        let engine = engine();
        let mut state = SessionState::new("s");
        let list = play(&engine, &mut state, &["start", "next"]).await;
        assert!(list.message().contains("1. 🌟 **The Forgotten Labyrinth**"));
        assert_eq!(state.phase, Phase::ThemeSelection);

        let invalid = engine.play_turn(&mut state, "7").await;
        assert_eq!(invalid.message(), INVALID_THEME);
        let invalid = engine.play_turn(&mut state, "labyrinth").await;
        assert_eq!(invalid.message(), INVALID_THEME);

        state.lives = 1;
        let reply = engine.play_turn(&mut state, "1").await;
        assert!(reply.accepted);
        let message = reply.message();
        assert!(message.contains("Lives remaining: 3"));
        assert!(message.contains(
            "🔍 **glowing_inscription**, 🔍 **silver_key**, 🔍 **stone_mirror**."
        ));
        assert_eq!(state.lives, 3);
        assert_eq!(state.current_theme(), Some(LABYRINTH));
    }

    #[tokio::test]
    async fn probing_elements() {
        let engine = engine();
        let mut state = SessionState::new("s");
        play(&engine, &mut state, &["start", "1"]).await;

        let miss = engine.play_turn(&mut state, "banana").await;
        assert_eq!(miss.message(), INVALID_ELEMENT);
        assert!(state.current_element().is_none());

        let reply = engine.play_turn(&mut state, "mirror").await;
        assert!(reply.message().starts_with("Your puzzle for the stone_mirror is: I never speak"));
        assert!(reply.message().ends_with("Difficulty: Easy"));
        assert!(reply.image.is_none());
        assert_eq!(state.current_element(), Some("stone_mirror"));
    }

    #[tokio::test]
    async fn exact_word_probe_wins() {
        let engine = engine();
        let mut state = SessionState::new("s");
        play(&engine, &mut state, &["start", "1"]).await;
        engine.play_turn(&mut state, "Silver_Key please").await;
        assert_eq!(state.current_element(), Some("silver_key"));
    }

    #[tokio::test]
    async fn correct_answer_scores_and_lists_remaining() {
        let engine = engine();
        let mut state = in_puzzle("stone_mirror");
        let reply = engine.play_turn(&mut state, "It's a mirror!").await;
        assert!(reply.accepted, "{}", reply.message());
        assert!(reply.message().starts_with("🎉 That's correct! 2 more to solve."));
        assert!(reply.message().contains("🔍 **glowing_inscription**, 🔍 **silver_key**"));
        assert_eq!(state.score, 10);
        assert!(state.is_solved(LABYRINTH, "stone_mirror"));
        assert_eq!(
            state.phase,
            Phase::RoomExploration { theme: LABYRINTH.into(), room: 0 }
        );

        let again = engine.play_turn(&mut state, "stone mirror").await;
        assert!(again.message().contains("already solved"));
        assert!(state.current_element().is_none());
    }

    #[tokio::test]
    async fn solving_the_last_element_completes_the_game() {
        let engine = engine();
        let mut state = in_puzzle("glowing_inscription");
        state.mark_solved(LABYRINTH, "stone_mirror");
        state.mark_solved(LABYRINTH, "silver_key");
        state.score = 15;
        let reply = engine.play_turn(&mut state, "27").await;
        assert!(reply.message().starts_with("🎉 Congratulations!"));
        assert!(reply.message().contains("Total score: 25 points"));
        assert_eq!(
            state.phase,
            Phase::GameOver { reason: GameOverReason::RoomComplete }
        );
        assert_eq!(state.score, 25);

        let usage = engine.play_turn(&mut state, "hello").await;
        assert_eq!(usage.message(), GAME_OVER_USAGE);
        let restart = engine.play_turn(&mut state, "next").await;
        assert!(restart.message().starts_with("Choose a theme"));
        assert_eq!(state.phase, Phase::ThemeSelection);
        assert_eq!(state.score, 0);
        assert!(state.solved.is_empty());
    }

    #[tokio::test]
    async fn hints_cost_points() {
        let engine = engine();
        let mut state = in_puzzle("silver_key");
        let reply = engine.play_turn(&mut state, "I need a HINT").await;
        assert_eq!(
            reply.message(),
            "Hint for the silver_key: Think about something that requires oxygen but isn't living."
        );
        engine.play_turn(&mut state, "hint").await;
        assert_eq!((state.score, state.hints_used), (-10, 2));
        assert_eq!(state.current_element(), Some("silver_key"));
    }

    #[tokio::test]
    async fn wrong_answers_cost_lives_then_reset() {
        let engine = engine();
        let mut state = in_puzzle("silver_key");
        state.score = 20;
        state.mark_solved(LABYRINTH, "stone_mirror");

        let first = engine.play_turn(&mut state, "water").await;
        assert!(!first.accepted);
        assert_eq!(
            first.message(),
            "Oops! That's not quite right. 😅 Lives remaining: 2. For hint, type Hint"
        );
        engine.play_turn(&mut state, "earth").await;
        assert_eq!(state.lives, 1);
        let last = engine.play_turn(&mut state, "wind").await;
        assert_eq!(last.message(), OUT_OF_LIVES);
        assert!(last.reload);
        assert_eq!(state.phase, Phase::GameOver { reason: GameOverReason::OutOfLives });
        assert_eq!((state.lives, state.score, state.hints_used), (3, 0, 0));
        assert!(state.solved.is_empty());
    }

    #[tokio::test]
    async fn exit_works_everywhere_and_reloads() {
        let engine = engine();
        for phase in [
            Phase::NotStarted,
            Phase::ThemeSelection,
            Phase::RoomExploration { theme: LABYRINTH.into(), room: 0 },
            in_puzzle("stone_mirror").phase,
        ] {
            let mut state = SessionState::new("s");
            state.phase = phase;
            let reply = engine.play_turn(&mut state, "Exit").await;
            assert_eq!(reply.message(), FAREWELL);
            assert!(reply.reload);
            assert_eq!(state.phase, Phase::GameOver { reason: GameOverReason::Exited });
        }

        let mut over = SessionState::new("s");
        over.phase = Phase::GameOver { reason: GameOverReason::OutOfLives };
        engine.play_turn(&mut over, "exit").await;
        assert_eq!(over.phase, Phase::GameOver { reason: GameOverReason::OutOfLives });
    }

    #[tokio::test]
    async fn stale_theme_falls_back_to_selection() {
        let engine = engine();
        let mut state = SessionState::new("s");
        state.phase = Phase::RoomExploration { theme: "gone".into(), room: 0 };
        let reply = engine.play_turn(&mut state, "mirror").await;
        assert!(reply.message().contains("Room for theme 'gone' not found"));
        assert_eq!(state.phase, Phase::ThemeSelection);

        let mut state = in_puzzle("vanished_element");
        let reply = engine.play_turn(&mut state, "mirror").await;
        assert!(!reply.accepted);
        assert!(reply.message().starts_with("Error: Element 'vanished_element' not found"));
        assert_eq!(state.current_element(), None);
    }

    #[tokio::test]
    async fn failed_turn_leaves_session_untouched() {
        let engine = engine();
        let mut state = in_puzzle("silver_key");
        state.score = i32::MIN + 1;
        let before = state.clone();
        let reply = engine.play_turn(&mut state, "hint").await;
        assert_eq!(reply.message(), APOLOGY);
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn multi_room_themes_advance() {
        let content = r#"
[[theme]]
name = "Two Rooms"

[[theme.room]]
name = "Hall"
description = "A long hall."
[[theme.room.element]]
name = "door"
puzzle = "What opens?"
hint = "It is a door."
answers = ["door"]

[[theme.room]]
name = "Vault"
description = "A cold vault."
[[theme.room.element]]
name = "safe"
puzzle = "What keeps secrets?"
hint = "Steel box."
answers = ["safe"]
"#;
        let normalizer = Normalizer::english();
        let catalog = Catalog::from_records(parse_content(content).unwrap(), &normalizer).unwrap();
        let illustrator = Illustrator::new(DisabledBackend, RetryPolicy::immediate(1), 8, 400);
        let engine = Engine::new(Arc::new(catalog), normalizer, illustrator);

        let mut state = SessionState::new("s");
        let reply = play(&engine, &mut state, &["start", "1", "door", "door"]).await;
        assert!(reply.message().contains("You've cleared the Hall"));
        assert!(reply.message().contains("A cold vault."));
        assert_eq!(state.current_room(), Some(1));

        let done = play(&engine, &mut state, &["safe", "safe"]).await;
        assert!(done.message().starts_with("🎉 Congratulations!"));
        assert_eq!(state.score, 20);
    }

    #[tokio::test]
    async fn entering_an_element_attaches_the_illustration() {
        let normalizer = Normalizer::english();
        let catalog = Arc::new(Catalog::bundled(&normalizer).unwrap());
        let backend = ScriptedBackend::new(vec![
            Err(GenerationError::Timeout),
            Ok(png_bytes(32, 32)),
        ]);
        let engine = Engine::new(
            catalog,
            normalizer,
            Illustrator::new(backend, RetryPolicy::immediate(3), 8, 400),
        );
        let mut state = SessionState::new("s");
        let reply = play(&engine, &mut state, &["start", "1", "mirror"]).await;
        assert!(reply.image.is_some());
        assert_eq!(engine.illustrator().backend().calls(), 2);

        let view = serde_json::to_value(reply.view()).unwrap();
        assert_eq!(view["accepted"], true);
        assert!(view["image"].is_string());
        assert!(view["message"].as_str().unwrap().starts_with("Your puzzle"));
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(7)), "0m 07s");
        assert_eq!(format_elapsed(Duration::from_secs(127)), "2m 07s");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
