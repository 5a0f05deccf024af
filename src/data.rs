//! Serialized layout of puzzle content, as read from TOML content files.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentFile {
    #[serde(rename = "theme", default)]
    pub themes: Vec<ThemeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "room", default)]
    pub rooms: Vec<RoomRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "element", default)]
    pub elements: Vec<ElementRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRecord {
    pub name: String,
    pub puzzle: String,
    pub hint: String,
    /// 1 = easy, 2 = medium, 3 = hard.
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    #[serde(default)]
    pub answers: Vec<String>,
}

fn default_difficulty() -> u8 {
    1
}
