use crate::session::{SessionState, deserialize_state, now_ts, serialize_state};
use parking_lot::RwLock;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

const SNAPSHOT_INTERVAL_SECS: u64 = 300;
const SNAPSHOT_RANDOM_CHANCE: f64 = 0.1;
pub const MAX_SESSION_COUNT: usize = 4096;

/// One session's state. Holding the lock serializes turns for that session only.
pub type SessionHandle = Arc<Mutex<SessionState>>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read session snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed session snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result of [`SessionStore::checkout`].
pub struct Checkout {
    pub handle: SessionHandle,
    pub created: bool,
    /// Session dropped to make room for this one.
    pub evicted: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    shared: Arc<StoreShared>,
}

impl SessionStore {
    pub fn persistent(path: impl Into<PathBuf>, max_sessions: usize) -> Self {
        Self::with_path(Some(path.into()), max_sessions)
    }

    pub fn ephemeral(max_sessions: usize) -> Self {
        Self::with_path(None, max_sessions)
    }

    fn with_path(path: Option<PathBuf>, max_sessions: usize) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                inner: RwLock::new(StoreData::default()),
                persistence: SnapshotPersistence::new(path),
                max_sessions: max_sessions.max(1),
            }),
        }
    }

    /// Returns the session for `session_id`, creating it when unknown. The map lock is released
    /// before the caller touches the session.
    pub fn checkout(&self, session_id: &str) -> Checkout {
        let mut guard = self.shared.inner.write();
        guard.tick = guard.tick.saturating_add(1);
        let tick = guard.tick;
        if let Some(slot) = guard.sessions.get_mut(session_id) {
            slot.last_used = tick;
            return Checkout {
                handle: Arc::clone(&slot.handle),
                created: false,
                evicted: None,
            };
        }

        let mut evicted = None;
        if guard.sessions.len() >= self.shared.max_sessions {
            if let Some(oldest) = oldest_session_key(&guard.sessions) {
                guard.sessions.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        let handle = Arc::new(Mutex::new(SessionState::new(session_id)));
        guard.sessions.insert(
            session_id.to_string(),
            SessionSlot {
                handle: Arc::clone(&handle),
                last_used: tick,
            },
        );
        Checkout {
            handle,
            created: true,
            evicted,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let guard = self.shared.inner.read();
        guard
            .sessions
            .get(session_id)
            .map(|slot| Arc::clone(&slot.handle))
    }

    /// Inserts or replaces a session, e.g. one restored from a serialized record. Waits for a
    /// turn in flight on the same session, like any other turn would.
    pub async fn insert(&self, state: SessionState) -> Option<String> {
        let Checkout { handle, evicted, .. } = self.checkout(&state.session_id);
        *handle.lock().await = state;
        evicted
    }

    /// Replaces the session only if no turn holds it. Returns whether the state was installed.
    fn insert_if_idle(&self, state: SessionState) -> bool {
        let handle = self.checkout(&state.session_id).handle;
        match handle.try_lock() {
            Ok(mut current) => {
                *current = state;
                true
            }
            Err(_) => false,
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.shared.inner.write().sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.shared.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.shared.persistence.path.as_deref()
    }

    /// Writes a snapshot when the persistence policy says it is time.
    pub async fn maybe_snapshot(&self) {
        if self.shared.persistence.should_snapshot() {
            self.snapshot().await;
        }
    }

    /// Writes a snapshot on the blocking pool.
    pub async fn snapshot(&self) {
        if self.shared.persistence.path.is_none() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let task = tokio::task::spawn_blocking(move || shared.write_snapshot());
        if let Err(err) = task.await {
            warn!(error = %err, "session snapshot task failed");
        }
    }

    /// Writes a snapshot on the calling thread. For use outside the async runtime.
    pub fn snapshot_now(&self) {
        self.shared.write_snapshot();
    }

    /// Loads the latest snapshot. A missing file is not an error. Sessions busy with a turn keep
    /// their live state and are not counted.
    pub fn restore(&self) -> Result<usize, SnapshotError> {
        let Some(path) = self.shared.persistence.path.clone() else {
            return Ok(0);
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(SnapshotError::Read { path, source }),
        };
        let Some(line) = text.lines().rev().find(|line| !line.trim().is_empty()) else {
            return Ok(0);
        };
        let snapshot: SessionSnapshot = serde_json::from_str(line)?;
        let mut restored = 0;
        for blob in &snapshot.sessions {
            match deserialize_state(blob) {
                Ok(state) if !state.session_id.is_empty() => {
                    let id = state.session_id.clone();
                    if self.insert_if_idle(state) {
                        restored += 1;
                    } else {
                        warn!(session_id = %id, "session busy, snapshot copy not restored");
                    }
                }
                Ok(_) => warn!("skipping snapshot session without id"),
                Err(err) => warn!(error = %err, "skipping unreadable snapshot session"),
            }
        }
        info!(restored, captured_at = snapshot.captured_at, "sessions restored from snapshot");
        Ok(restored)
    }
}

struct StoreShared {
    inner: RwLock<StoreData>,
    persistence: SnapshotPersistence,
    max_sessions: usize,
}

impl StoreShared {
    fn write_snapshot(&self) {
        if self.persistence.path.is_none() {
            return;
        }
        let snapshot = self.inner.read().snapshot();
        self.persistence.write_snapshot(&snapshot);
    }
}

#[derive(Default)]
struct StoreData {
    sessions: HashMap<String, SessionSlot>,
    tick: u64,
}

impl StoreData {
    /// Sessions in the middle of a turn are skipped; they are picked up by the next snapshot.
    fn snapshot(&self) -> SessionSnapshot {
        let mut sessions = Vec::with_capacity(self.sessions.len());
        for slot in self.sessions.values() {
            let Ok(state) = slot.handle.try_lock() else {
                continue;
            };
            match serialize_state(&state) {
                Ok(blob) => sessions.push(blob),
                Err(err) => warn!(error = %err, "failed to serialize session for snapshot"),
            }
        }
        SessionSnapshot {
            captured_at: now_ts(),
            sessions,
        }
    }
}

struct SessionSlot {
    handle: SessionHandle,
    last_used: u64,
}

struct SnapshotPersistence {
    path: Option<PathBuf>,
    last_flush: AtomicU64,
    writer: parking_lot::Mutex<()>,
}

impl SnapshotPersistence {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            last_flush: AtomicU64::new(0),
            writer: parking_lot::Mutex::new(()),
        }
    }

    fn should_snapshot(&self) -> bool {
        if self.path.is_none() {
            return false;
        }
        let now = now_ts();
        let last = self.last_flush.load(AtomicOrdering::Relaxed);
        if now.saturating_sub(last) >= SNAPSHOT_INTERVAL_SECS {
            return true;
        }
        thread_rng().gen_bool(SNAPSHOT_RANDOM_CHANCE)
    }

    /// Replaces the snapshot file through a temporary sibling so readers never see a partial
    /// write and the file holds exactly one snapshot.
    fn write_snapshot(&self, snapshot: &SessionSnapshot) {
        let Some(path) = &self.path else {
            return;
        };
        let _writer = self.writer.lock();
        match replace_snapshot_file(path, snapshot) {
            Ok(()) => self.last_flush.store(now_ts(), AtomicOrdering::Release),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to write session snapshot")
            }
        }
    }
}

fn replace_snapshot_file(path: &Path, snapshot: &SessionSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec(snapshot)?;
    bytes.push(b'\n');
    let staging = staging_path(path);
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    captured_at: u64,
    /// Serialized session records.
    sessions: Vec<String>,
}

fn oldest_session_key(sessions: &HashMap<String, SessionSlot>) -> Option<String> {
    sessions
        .iter()
        .min_by_key(|(_, slot)| slot.last_used)
        .map(|(key, _)| key.clone())
}

pub fn generate_session_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}
