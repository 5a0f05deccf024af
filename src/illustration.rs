//! Puzzle illustrations: a generation backend wrapped in retries, thumbnailing and a
//! per-session cache.
//!
//! Illustrations are decoration. Every failure here ends in `None` and a log line; nothing is
//! ever surfaced to the player as an error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::nlp::normalize;

pub const DEFAULT_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/stabilityai/stable-diffusion-xl-base-1.0";
pub const DEFAULT_THUMBNAIL_PX: u32 = 400;
const NEGATIVE_PROMPT: &str = "blurry, low quality, bad composition";
const INFERENCE_STEPS: u32 = 30;
const GUIDANCE_SCALE: f64 = 7.5;
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("illustrations are disabled")]
    Disabled,

    #[error("image request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("model is warming up")]
    WarmingUp { estimated: Option<Duration> },

    #[error("image service rejected credentials (status {0})")]
    Unauthorized(u16),

    #[error("image service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode thumbnail: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Network(err.to_string())
        }
    }
}

/// Something that turns a text prompt into encoded image bytes.
pub trait ImageBackend: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<Vec<u8>, GenerationError>> + Send;
}

/// Hugging Face style inference endpoint returning raw image bytes.
#[derive(Debug, Clone)]
pub struct HttpImageBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpImageBackend {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("escape-room-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// Reads the bearer token from `token_env`. A missing token is not fatal: the service will
    /// answer 401 and the wrapper stops retrying.
    pub fn from_env(
        endpoint: impl Into<String>,
        token_env: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let token = std::env::var(token_env).ok().filter(|t| !t.trim().is_empty());
        if token.is_none() {
            warn!(token_env, "no image API token set; requests will be unauthenticated");
        }
        Self::new(endpoint, token, timeout)
    }
}

impl ImageBackend for HttpImageBackend {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "negative_prompt": NEGATIVE_PROMPT,
                "num_inference_steps": INFERENCE_STEPS,
                "guidance_scale": GUIDANCE_SCALE,
            }
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.bytes().await?.to_vec());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), &text))
    }
}

#[derive(Deserialize)]
struct LoadingBody {
    error: Option<String>,
    estimated_time: Option<f64>,
}

fn classify_failure(status: u16, body: &str) -> GenerationError {
    match status {
        401 | 403 => GenerationError::Unauthorized(status),
        503 => {
            let parsed: Option<LoadingBody> = serde_json::from_str(body).ok();
            let loading = parsed
                .as_ref()
                .and_then(|b| b.error.as_deref())
                .unwrap_or(body)
                .to_lowercase()
                .contains("loading");
            if loading {
                let estimated = parsed
                    .and_then(|b| b.estimated_time)
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64);
                GenerationError::WarmingUp { estimated }
            } else {
                rejected(status, body)
            }
        }
        _ => rejected(status, body),
    }
}

fn rejected(status: u16, body: &str) -> GenerationError {
    GenerationError::Rejected {
        status,
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

impl ImageBackend for DisabledBackend {
    async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

/// Backend chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredBackend {
    Http(HttpImageBackend),
    Disabled(DisabledBackend),
}

impl ImageBackend for ConfiguredBackend {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        match self {
            ConfiguredBackend::Http(backend) => backend.generate(prompt).await,
            ConfiguredBackend::Disabled(backend) => backend.generate(prompt).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    /// Used when a warming-up model gives no estimate.
    pub warmup_delay: Duration,
    pub max_warmup_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(5),
            warmup_delay: Duration::from_secs(2),
            max_warmup_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
            backoff_factor: 1.0,
            max_backoff: Duration::ZERO,
            warmup_delay: Duration::ZERO,
            max_warmup_delay: Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_retryable(&self, err: &GenerationError) -> bool {
        !matches!(
            err,
            GenerationError::Disabled | GenerationError::Unauthorized(_)
        )
    }

    /// Delay before the attempt following the 1-based `attempt` that failed with `err`.
    pub fn delay_after(&self, attempt: u32, err: &GenerationError) -> Duration {
        if let GenerationError::WarmingUp { estimated } = err {
            return estimated
                .unwrap_or(self.warmup_delay)
                .min(self.max_warmup_delay);
        }
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.backoff.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// Decodes `bytes`, shrinks the image to fit in a `max_px` square (never enlarging) and returns
/// it as base64 PNG.
pub fn thumbnail_base64(bytes: &[u8], max_px: u32) -> Result<String, GenerationError> {
    let img = image::load_from_memory(bytes).map_err(|e| GenerationError::Decode(e.to_string()))?;
    let img = if img.width() > max_px || img.height() > max_px {
        img.thumbnail(max_px, max_px)
    } else {
        img
    };
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| GenerationError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(out.into_inner()))
}

pub fn illustration_prompt(element: &str, puzzle: &str) -> String {
    format!(
        "Mysterious {element} related to the puzzle: {puzzle}. Dark, cyberpunk detective style, with dramatic lighting and intrigue"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IllustrationKey {
    pub session_id: String,
    pub theme: String,
    pub element: String,
}

impl IllustrationKey {
    pub fn new(session_id: &str, theme: &str, element: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            theme: normalize(theme),
            element: normalize(element),
        }
    }
}

type ElementSlot = (String, String);

/// Illustrations grouped by session. A live session's entries are dropped only through
/// [`IllustrationCache::forget_session`]; whole sessions age out in LRU order once more than
/// `max_sessions` of them hold entries. The lock is only taken for single get/put calls.
pub struct IllustrationCache {
    sessions: Mutex<LruCache<String, HashMap<ElementSlot, Arc<str>>>>,
}

impl IllustrationCache {
    pub fn new(max_sessions: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &IllustrationKey) -> Option<Arc<str>> {
        let mut sessions = self.sessions.lock();
        let entries = sessions.get(key.session_id.as_str())?;
        entries.get(&(key.theme.clone(), key.element.clone())).cloned()
    }

    pub fn insert(&self, key: IllustrationKey, image: Arc<str>) {
        let IllustrationKey {
            session_id,
            theme,
            element,
        } = key;
        let mut sessions = self.sessions.lock();
        if let Some(entries) = sessions.get_mut(session_id.as_str()) {
            entries.insert((theme, element), image);
            return;
        }
        let mut entries = HashMap::new();
        entries.insert((theme, element), image);
        if let Some((dropped, _)) = sessions.push(session_id.clone(), entries) {
            if dropped != session_id {
                debug!(session_id = %dropped, "illustrations aged out");
            }
        }
    }

    /// Entries across all sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry for `session_id`, returning how many were removed.
    pub fn forget_session(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .pop(session_id)
            .map_or(0, |entries| entries.len())
    }
}

pub struct Illustrator<B> {
    backend: B,
    policy: RetryPolicy,
    cache: IllustrationCache,
    thumbnail_px: u32,
}

impl<B: ImageBackend> Illustrator<B> {
    /// `max_sessions` should match the session store so live sessions never lose entries.
    pub fn new(backend: B, policy: RetryPolicy, max_sessions: usize, thumbnail_px: u32) -> Self {
        Self {
            backend,
            policy,
            cache: IllustrationCache::new(max_sessions),
            thumbnail_px: thumbnail_px.max(1),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &IllustrationCache {
        &self.cache
    }

    /// Cached thumbnail for the element, generating it on a miss. `None` once attempts run out.
    pub async fn get_illustration(
        &self,
        session_id: &str,
        theme: &str,
        element: &str,
        puzzle: &str,
    ) -> Option<Arc<str>> {
        let key = IllustrationKey::new(session_id, theme, element);
        if let Some(hit) = self.cache.get(&key) {
            debug!(session_id, element, "illustration cache hit");
            return Some(hit);
        }

        let prompt = illustration_prompt(element, puzzle);
        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            let err = match self.backend.generate(&prompt).await {
                Ok(bytes) => match thumbnail_base64(&bytes, self.thumbnail_px) {
                    Ok(encoded) => {
                        let encoded: Arc<str> = Arc::from(encoded);
                        self.cache.insert(key, Arc::clone(&encoded));
                        info!(session_id, element, attempt, "illustration generated");
                        return Some(encoded);
                    }
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if matches!(err, GenerationError::Disabled) {
                return None;
            }
            if !self.policy.is_retryable(&err) || attempt == attempts {
                warn!(session_id, element, attempt, error = %err, "giving up on illustration");
                return None;
            }
            let delay = self.policy.delay_after(attempt, &err);
            debug!(attempt, ?delay, error = %err, "illustration attempt failed, retrying");
            tokio::time::sleep(delay).await;
        }
        None
    }
}
