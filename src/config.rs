//! Runtime configuration.
//!
//! Every section and field is optional in the TOML file; anything left out takes the default
//! below. CLI flags override the file.
//!
//! ```toml
//! [server]
//! addr = "127.0.0.1:8080"
//!
//! [content]
//! path = "data/my_themes.toml"
//!
//! [illustrations]
//! enabled = true
//! token_env = "HF_API_TOKEN"
//! max_attempts = 3
//!
//! [sessions]
//! max_sessions = 4096
//! snapshot_path = "data/sessions.json"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::illustration::{DEFAULT_ENDPOINT, DEFAULT_THUMBNAIL_PX, RetryPolicy};
use crate::sessions::MAX_SESSION_COUNT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub content: ContentConfig,
    pub illustrations: IllustrationConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Where themes come from. `None` means the bundled content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IllustrationConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Name of the environment variable holding the bearer token.
    pub token_env: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub warmup_delay_ms: u64,
    pub max_warmup_ms: u64,
    pub thumbnail_px: u32,
}

impl Default for IllustrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_env: "HF_API_TOKEN".to_string(),
            timeout_secs: 60,
            max_attempts: 3,
            backoff_ms: 500,
            warmup_delay_ms: 2_000,
            max_warmup_ms: 20_000,
            thumbnail_px: DEFAULT_THUMBNAIL_PX,
        }
    }
}

impl IllustrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
            warmup_delay: Duration::from_millis(self.warmup_delay_ms),
            max_warmup_delay: Duration::from_millis(self.max_warmup_ms),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSION_COUNT,
            snapshot_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults when no path is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
