//! Immutable in-memory view of the puzzle content.
//!
//! Content is read once from a [`ContentSource`], validated, and indexed by normalized theme and
//! element names. Answers are preprocessed at load time so turns only preprocess the player's
//! input. Nothing in here is mutable: solved progress lives in [`crate::session::SessionState`].

use crate::data::{ContentFile, ElementRecord, RoomRecord, ThemeRecord};
use crate::nlp::{Normalizer, normalize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

static BUNDLED_CONTENT: &str = include_str!("../data/forgotten_labyrinth.toml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read content file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse content: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("content defines no themes")]
    Empty,

    #[error("theme name must not be blank")]
    BlankName,

    #[error("duplicate theme {0:?}")]
    DuplicateTheme(String),

    #[error("theme {0:?} has no rooms")]
    EmptyTheme(String),

    #[error("element {element:?} appears more than once in theme {theme:?}")]
    DuplicateElement { theme: String, element: String },

    #[error("element {element:?} in theme {theme:?} has no answers")]
    NoAnswers { theme: String, element: String },

    #[error("element {element:?} has difficulty {value}, expected 1-3")]
    Difficulty { element: String, value: u8 },
}

/// Read access to the content repository.
pub trait ContentSource {
    fn load(&self) -> Result<Vec<ThemeRecord>, CatalogError>;
}

/// Content stored in a TOML file on disk.
#[derive(Debug, Clone)]
pub struct TomlContent {
    path: PathBuf,
}

impl TomlContent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for TomlContent {
    fn load(&self) -> Result<Vec<ThemeRecord>, CatalogError> {
        let text = fs::read_to_string(&self.path).map_err(|source| CatalogError::Read {
            path: self.path.clone(),
            source,
        })?;
        parse_content(&text)
    }
}

/// The default content compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledContent;

impl ContentSource for BundledContent {
    fn load(&self) -> Result<Vec<ThemeRecord>, CatalogError> {
        parse_content(BUNDLED_CONTENT)
    }
}

pub fn parse_content(text: &str) -> Result<Vec<ThemeRecord>, CatalogError> {
    let file: ContentFile = toml::from_str(text)?;
    Ok(file.themes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Difficulty::Easy),
            2 => Some(Difficulty::Medium),
            3 => Some(Difficulty::Hard),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub struct Catalog {
    themes: Vec<Theme>,
    by_key: HashMap<String, usize>,
}

impl Catalog {
    pub fn load(source: &dyn ContentSource, normalizer: &Normalizer) -> Result<Self, CatalogError> {
        Self::from_records(source.load()?, normalizer)
    }

    pub fn bundled(normalizer: &Normalizer) -> Result<Self, CatalogError> {
        Self::load(&BundledContent, normalizer)
    }

    pub fn from_records(
        records: Vec<ThemeRecord>,
        normalizer: &Normalizer,
    ) -> Result<Self, CatalogError> {
        if records.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut themes = Vec::with_capacity(records.len());
        let mut by_key = HashMap::with_capacity(records.len());
        for record in records {
            let theme = Theme::from_record(record, normalizer)?;
            if by_key.insert(theme.key.clone(), themes.len()).is_some() {
                return Err(CatalogError::DuplicateTheme(theme.name));
            }
            themes.push(theme);
        }
        Ok(Self { themes, by_key })
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    pub fn theme_count(&self) -> usize {
        self.themes.len()
    }

    /// Looks a theme up by (possibly unnormalized) name.
    pub fn theme(&self, name: &str) -> Option<&Theme> {
        self.by_key.get(&normalize(name)).map(|&idx| &self.themes[idx])
    }

    /// 1-based position, as shown in the theme list.
    pub fn theme_by_number(&self, number: usize) -> Option<&Theme> {
        number.checked_sub(1).and_then(|idx| self.themes.get(idx))
    }

    pub fn element_names(&self) -> Vec<&str> {
        self.themes
            .iter()
            .flat_map(|theme| theme.rooms.iter())
            .flat_map(|room| room.elements())
            .map(|element| element.name())
            .collect()
    }
}

#[derive(Debug)]
pub struct Theme {
    key: String,
    name: String,
    description: String,
    rooms: Vec<Room>,
}

impl Theme {
    fn from_record(record: ThemeRecord, normalizer: &Normalizer) -> Result<Self, CatalogError> {
        let key = normalize(&record.name);
        if key.is_empty() {
            return Err(CatalogError::BlankName);
        }
        if record.rooms.is_empty() {
            return Err(CatalogError::EmptyTheme(record.name));
        }
        let mut seen = HashSet::new();
        let mut rooms = Vec::with_capacity(record.rooms.len());
        for room in record.rooms {
            let room = Room::from_record(room, &record.name, normalizer)?;
            for element in room.elements() {
                if !seen.insert(element.key.clone()) {
                    return Err(CatalogError::DuplicateElement {
                        theme: record.name.clone(),
                        element: element.name.clone(),
                    });
                }
            }
            rooms.push(room);
        }
        Ok(Self {
            key,
            name: record.name,
            description: record.description,
            rooms,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, index: usize) -> Option<&Room> {
        self.rooms.get(index)
    }
}

#[derive(Debug)]
pub struct Room {
    name: String,
    description: String,
    elements: BTreeMap<String, Element>,
}

impl Room {
    fn from_record(
        record: RoomRecord,
        theme: &str,
        normalizer: &Normalizer,
    ) -> Result<Self, CatalogError> {
        let mut elements = BTreeMap::new();
        for element in record.elements {
            let element = Element::from_record(element, theme, normalizer)?;
            if elements.contains_key(&element.key) {
                return Err(CatalogError::DuplicateElement {
                    theme: theme.to_string(),
                    element: element.name,
                });
            }
            elements.insert(element.key.clone(), element);
        }
        Ok(Self {
            name: record.name,
            description: record.description,
            elements,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Elements ordered by normalized name.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.get(&normalize(name))
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

#[derive(Debug)]
pub struct Element {
    key: String,
    name: String,
    puzzle: String,
    hint: String,
    difficulty: Difficulty,
    answers: Vec<String>,
    processed_answers: Vec<String>,
}

impl Element {
    fn from_record(
        record: ElementRecord,
        theme: &str,
        normalizer: &Normalizer,
    ) -> Result<Self, CatalogError> {
        let difficulty =
            Difficulty::from_level(record.difficulty).ok_or_else(|| CatalogError::Difficulty {
                element: record.name.clone(),
                value: record.difficulty,
            })?;
        let answers: Vec<String> = record
            .answers
            .into_iter()
            .filter(|answer| !answer.trim().is_empty())
            .collect();
        if answers.is_empty() {
            return Err(CatalogError::NoAnswers {
                theme: theme.to_string(),
                element: record.name,
            });
        }
        let processed_answers = answers
            .iter()
            .map(|answer| normalizer.answer_form(answer))
            .collect();
        Ok(Self {
            key: normalize(&record.name),
            name: record.name,
            puzzle: record.puzzle,
            hint: record.hint,
            difficulty,
            answers,
            processed_answers,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn puzzle(&self) -> &str {
        &self.puzzle
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    /// Answers in the form produced by [`Normalizer::answer_form`].
    pub fn processed_answers(&self) -> &[String] {
        &self.processed_answers
    }
}
