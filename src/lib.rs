//! Conversational escape-room engine.
//!
//! Players move through themes, rooms and puzzle elements by typing free text. Answers are
//! compared after normalization and lemmatization with exact, word-subset and fuzzy strategies.
//! Each session keeps its own lives, score and solved progress.

pub mod catalog;
pub mod config;
mod data;
pub mod engine;
pub mod illustration;
pub mod matcher;
pub mod nlp;
pub mod service;
pub mod session;
pub mod sessions;
#[cfg(feature = "web")]
pub mod web;

pub use catalog::{BundledContent, Catalog, CatalogError, ContentSource, Difficulty, TomlContent};
pub use config::{AppConfig, ConfigError};
pub use data::{ElementRecord, RoomRecord, ThemeRecord};
pub use engine::{Engine, TurnReply, TurnView};
pub use illustration::{
    ConfiguredBackend, DisabledBackend, GenerationError, HttpImageBackend, ImageBackend,
    Illustrator, RetryPolicy,
};
pub use matcher::{is_match, partial_ratio, token_sort_ratio};
pub use nlp::{Normalizer, normalize};
pub use service::{EscapeRoom, SetupError, build_service};
pub use session::{
    GameOverReason, Phase, SessionError, SessionState, deserialize_state, serialize_state,
};
pub use sessions::{SessionStore, generate_session_id};
