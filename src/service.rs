//! Session-aware front door: looks the session up, runs the turn under its lock, and persists.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{BundledContent, Catalog, CatalogError, ContentSource, TomlContent};
use crate::config::AppConfig;
use crate::engine::{Engine, TurnReply};
use crate::illustration::{
    ConfiguredBackend, DisabledBackend, GenerationError, HttpImageBackend, ImageBackend,
    Illustrator,
};
use crate::nlp::Normalizer;
use crate::session::{SessionError, deserialize_state, serialize_state};
use crate::sessions::{Checkout, SessionStore, generate_session_id};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to build image backend: {0}")]
    Backend(#[from] GenerationError),
}

pub struct EscapeRoom<B> {
    engine: Engine<B>,
    store: SessionStore,
}

impl<B: ImageBackend> EscapeRoom<B> {
    pub fn new(engine: Engine<B>, store: SessionStore) -> Self {
        Self { engine, store }
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn catalog(&self) -> &Catalog {
        self.engine.catalog()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Plays one turn for `session_id`, creating the session on first contact. Concurrent calls
    /// for the same session wait for each other; other sessions are unaffected.
    pub async fn handle_turn(&self, session_id: &str, raw_input: &str) -> TurnReply {
        let Checkout {
            handle,
            created,
            evicted,
        } = self.store.checkout(session_id);
        if created {
            info!(session_id, "session created");
        }
        if let Some(evicted) = evicted {
            let dropped = self.engine.illustrator().cache().forget_session(&evicted);
            debug!(session_id = %evicted, dropped, "session evicted");
        }

        let reply = {
            let mut state = handle.lock().await;
            self.engine.play_turn(&mut state, raw_input).await
        };
        self.store.maybe_snapshot().await;
        reply
    }

    /// Forgets everything about a session, including its cached illustrations.
    pub fn reset_session(&self, session_id: &str) -> bool {
        self.engine.illustrator().cache().forget_session(session_id);
        self.store.remove(session_id)
    }

    pub async fn export_session(&self, session_id: &str) -> Result<Option<String>, SessionError> {
        let Some(handle) = self.store.get(session_id) else {
            return Ok(None);
        };
        let state = handle.lock().await;
        serialize_state(&state).map(Some)
    }

    /// Loads a serialized session, returning its id. Records without an id get a fresh one. An
    /// import for a session in the middle of a turn waits for that turn to finish.
    pub async fn import_session(&self, blob: &str) -> Result<String, SessionError> {
        let mut state = deserialize_state(blob)?;
        if state.session_id.is_empty() {
            state.session_id = generate_session_id();
        }
        let id = state.session_id.clone();
        if let Some(evicted) = self.store.insert(state).await {
            self.engine.illustrator().cache().forget_session(&evicted);
        }
        Ok(id)
    }
}

/// Wires content, illustrations and the session store together from configuration.
pub fn build_service(config: &AppConfig) -> Result<EscapeRoom<ConfiguredBackend>, SetupError> {
    let normalizer = Normalizer::english();
    let source: Box<dyn ContentSource> = match &config.content.path {
        Some(path) => Box::new(TomlContent::new(path)),
        None => Box::new(BundledContent),
    };
    let catalog = Catalog::load(&*source, &normalizer)?;
    info!(themes = catalog.theme_count(), "content loaded");

    let settings = &config.illustrations;
    let backend = if settings.enabled {
        ConfiguredBackend::Http(HttpImageBackend::from_env(
            settings.endpoint.clone(),
            &settings.token_env,
            settings.timeout(),
        )?)
    } else {
        ConfiguredBackend::Disabled(DisabledBackend)
    };
    let illustrator = Illustrator::new(
        backend,
        settings.retry_policy(),
        config.sessions.max_sessions,
        settings.thumbnail_px,
    );

    let store = match &config.sessions.snapshot_path {
        Some(path) => SessionStore::persistent(path, config.sessions.max_sessions),
        None => SessionStore::ephemeral(config.sessions.max_sessions),
    };
    if let Err(err) = store.restore() {
        warn!(error = %err, "ignoring unreadable session snapshot");
    }

    let engine = Engine::new(Arc::new(catalog), normalizer, illustrator);
    Ok(EscapeRoom::new(engine, store))
}
