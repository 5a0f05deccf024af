//! Per-player game progress and its persisted form.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const STARTING_LIVES: u8 = 3;
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed session record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("session record version {0} is newer than supported version {RECORD_VERSION}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    Exited,
    RoomComplete,
    OutOfLives,
}

/// Where the player is. Theme and element are stored as normalized keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    NotStarted,
    ThemeSelection,
    RoomExploration {
        theme: String,
        room: usize,
    },
    ElementPuzzle {
        theme: String,
        room: usize,
        element: String,
    },
    GameOver {
        reason: GameOverReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: String,
    pub phase: Phase,
    pub lives: u8,
    pub score: i32,
    pub hints_used: u32,
    /// Theme key to the keys of elements solved in this session.
    pub solved: BTreeMap<String, BTreeSet<String>>,
    /// Unix seconds.
    pub started_at: u64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            phase: Phase::NotStarted,
            lives: STARTING_LIVES,
            score: 0,
            hints_used: 0,
            solved: BTreeMap::new(),
            started_at: now_ts(),
        }
    }

    pub fn game_started(&self) -> bool {
        !matches!(self.phase, Phase::NotStarted)
    }

    pub fn game_over(&self) -> bool {
        matches!(self.phase, Phase::GameOver { .. })
    }

    pub fn current_theme(&self) -> Option<&str> {
        match &self.phase {
            Phase::RoomExploration { theme, .. } | Phase::ElementPuzzle { theme, .. } => Some(theme),
            _ => None,
        }
    }

    pub fn current_room(&self) -> Option<usize> {
        match &self.phase {
            Phase::RoomExploration { room, .. } | Phase::ElementPuzzle { room, .. } => Some(*room),
            _ => None,
        }
    }

    pub fn current_element(&self) -> Option<&str> {
        match &self.phase {
            Phase::ElementPuzzle { element, .. } => Some(element),
            _ => None,
        }
    }

    pub fn is_solved(&self, theme: &str, element: &str) -> bool {
        self.solved
            .get(theme)
            .is_some_and(|elements| elements.contains(element))
    }

    /// Returns `false` when the element was already solved.
    pub fn mark_solved(&mut self, theme: &str, element: &str) -> bool {
        self.solved
            .entry(theme.to_string())
            .or_default()
            .insert(element.to_string())
    }

    /// Back to a fresh game: lives, score, hints and solved progress are cleared.
    pub fn reset_progress(&mut self) {
        self.lives = STARTING_LIVES;
        self.score = 0;
        self.hints_used = 0;
        self.solved.clear();
    }

    pub fn restart_timer(&mut self) {
        self.started_at = now_ts();
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs(now_ts().saturating_sub(self.started_at))
    }
}

pub(crate) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// On-disk shape. Every field has a default so partial records still load; the legacy fields are
/// only read when `version` is absent.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    phase: Phase,
    #[serde(default = "default_lives")]
    lives: u8,
    #[serde(default)]
    score: i32,
    #[serde(default)]
    hints_used: u32,
    #[serde(default)]
    solved: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, alias = "start_time", deserialize_with = "de_timestamp")]
    started_at: Option<u64>,

    #[serde(default, skip_serializing)]
    game_started: bool,
    #[serde(default, skip_serializing)]
    game_over: bool,
    #[serde(default, skip_serializing)]
    current_theme: Option<String>,
    #[serde(default, skip_serializing)]
    current_element: Option<String>,
    #[serde(default, skip_serializing)]
    current_room_index: usize,
}

fn default_lives() -> u8 {
    STARTING_LIVES
}

/// Accepts integer or fractional seconds; old records stored floats.
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
}

impl SessionRecord {
    fn into_state(self) -> Result<SessionState, SessionError> {
        let phase = match self.version {
            Some(version) if version > RECORD_VERSION => {
                return Err(SessionError::UnsupportedVersion(version));
            }
            Some(_) => self.phase,
            None => legacy_phase(
                self.game_started,
                self.game_over,
                self.current_theme.as_deref(),
                self.current_element.as_deref(),
                self.current_room_index,
            ),
        };
        Ok(SessionState {
            session_id: self.session_id,
            phase,
            lives: self.lives.min(STARTING_LIVES),
            score: self.score,
            hints_used: self.hints_used,
            solved: self.solved,
            started_at: self.started_at.unwrap_or_else(now_ts),
        })
    }
}

fn legacy_phase(
    started: bool,
    over: bool,
    theme: Option<&str>,
    element: Option<&str>,
    room: usize,
) -> Phase {
    let theme = theme.map(crate::nlp::normalize).filter(|t| !t.is_empty());
    let element = element.map(crate::nlp::normalize).filter(|e| !e.is_empty());
    if over {
        return Phase::GameOver {
            reason: GameOverReason::Exited,
        };
    }
    if !started {
        return Phase::NotStarted;
    }
    match (theme, element) {
        (None, _) => Phase::ThemeSelection,
        (Some(theme), None) => Phase::RoomExploration { theme, room },
        (Some(theme), Some(element)) => Phase::ElementPuzzle {
            theme,
            room,
            element,
        },
    }
}

pub fn serialize_state(state: &SessionState) -> Result<String, SessionError> {
    let record = SessionRecord {
        version: Some(RECORD_VERSION),
        session_id: state.session_id.clone(),
        phase: state.phase.clone(),
        lives: state.lives,
        score: state.score,
        hints_used: state.hints_used,
        solved: state.solved.clone(),
        started_at: Some(state.started_at),
        game_started: state.game_started(),
        game_over: state.game_over(),
        current_theme: None,
        current_element: None,
        current_room_index: 0,
    };
    Ok(serde_json::to_string(&record)?)
}

pub fn deserialize_state(text: &str) -> Result<SessionState, SessionError> {
    let record: SessionRecord = serde_json::from_str(text)?;
    record.into_state()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionState {
        let mut state = SessionState::new("abc123");
        state.phase = Phase::ElementPuzzle {
            theme: "the forgotten labyrinth".into(),
            room: 0,
            element: "silver_key".into(),
        };
        state.lives = 2;
        state.score = -5;
        state.hints_used = 3;
        state.mark_solved("the forgotten labyrinth", "stone_mirror");
        state.started_at = 1_700_000_000;
        state
    }

    #[test]
    fn round_trip_preserves_everything() {
        let state = sample();
        let text = serialize_state(&state).unwrap();
        assert!(text.contains("\"version\":1"));
        assert!(text.contains("\"state\":\"element_puzzle\""));
        assert!(!text.contains("current_theme"));
        assert_eq!(deserialize_state(&text).unwrap(), state);
    }

    #[test]
    fn round_trip_for_every_phase() {
        let phases = [
            Phase::NotStarted,
            Phase::ThemeSelection,
            Phase::RoomExploration {
                theme: "x".into(),
                room: 2,
            },
            Phase::GameOver {
                reason: GameOverReason::OutOfLives,
            },
        ];
        for phase in phases {
            let mut state = sample();
            state.phase = phase;
            let restored = deserialize_state(&serialize_state(&state).unwrap()).unwrap();
            assert_eq!(restored, state);
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        let state = deserialize_state(r#"{"version":1,"session_id":"s"}"#).unwrap();
        assert_eq!(state.phase, Phase::NotStarted);
        assert_eq!(state.lives, STARTING_LIVES);
        assert_eq!(state.score, 0);
        assert!(state.solved.is_empty());
        assert!(state.started_at > 0);
    }

    #[test]
    fn legacy_records_are_migrated() {
        let legacy = r#"{
            "current_room_index": 0,
            "current_theme": "The Forgotten Labyrinth",
            "current_element": "stone_mirror",
            "last_suggestion": null,
            "game_over": false,
            "score": 15,
            "start_time": 1700000000.25,
            "game_started": true,
            "lives": 1
        }"#;
        let state = deserialize_state(legacy).unwrap();
        assert_eq!(
            state.phase,
            Phase::ElementPuzzle {
                theme: "the forgotten labyrinth".into(),
                room: 0,
                element: "stone_mirror".into(),
            }
        );
        assert_eq!(state.score, 15);
        assert_eq!(state.lives, 1);
        assert_eq!(state.started_at, 1_700_000_000);

        let selecting = deserialize_state(r#"{"game_started":true,"current_theme":null}"#).unwrap();
        assert_eq!(selecting.phase, Phase::ThemeSelection);
        let over = deserialize_state(r#"{"game_started":true,"game_over":true}"#).unwrap();
        assert!(over.game_over());
        assert_eq!(deserialize_state("{}").unwrap().phase, Phase::NotStarted);
    }

    #[test]
    fn newer_versions_and_garbage_are_rejected() {
        assert!(matches!(
            deserialize_state(r#"{"version":2}"#),
            Err(SessionError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            deserialize_state("not json"),
            Err(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn solved_tracking_is_per_theme() {
        let mut state = SessionState::new("s");
        assert!(state.mark_solved("a", "mirror"));
        assert!(!state.mark_solved("a", "mirror"));
        assert!(state.is_solved("a", "mirror"));
        assert!(!state.is_solved("b", "mirror"));
        state.score = 30;
        state.reset_progress();
        assert!(!state.is_solved("a", "mirror"));
        assert_eq!((state.lives, state.score, state.hints_used), (STARTING_LIVES, 0, 0));
    }
}
