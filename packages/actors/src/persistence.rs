//! Durable storage for coordinator queue state.
//!
//! The coordinator persists its whole [`QueueState`] after every mutation. A
//! [`StateStore`] keeps one record per coordinator instance and bumps a version
//! counter on each save.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use db::DbError;
use db::repositories::CoordinatorStateRepository;
use queue_core::QueueState;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Future returned by [`StateStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PersistenceError>> + Send + 'a>>;

/// Backend that durably holds coordinator state.
pub trait StateStore: Send + Sync + 'static {
    /// Short description used in logs.
    fn describe(&self) -> String;

    /// Load the last state saved for `instance`.
    fn load<'a>(&'a self, instance: &'a str) -> StoreFuture<'a, Option<QueueState>>;

    /// Replace the state saved for `instance`, returning the new version.
    fn save<'a>(&'a self, instance: &'a str, state: &'a QueueState) -> StoreFuture<'a, u64>;
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// State stored in the SurrealDB `coordinator_state` table.
///
/// Requires [`db::init`] to have been called.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurrealStateStore;

impl StateStore for SurrealStateStore {
    fn describe(&self) -> String {
        "surrealdb".to_string()
    }

    fn load<'a>(&'a self, instance: &'a str) -> StoreFuture<'a, Option<QueueState>> {
        Box::pin(async move {
            let stored = CoordinatorStateRepository::load(instance).await?;
            if let Some(stored) = &stored {
                tracing::debug!("Loaded state {} at version {}", instance, stored.version);
            }
            Ok(stored.map(|s| s.state))
        })
    }

    fn save<'a>(&'a self, instance: &'a str, state: &'a QueueState) -> StoreFuture<'a, u64> {
        Box::pin(async move { Ok(CoordinatorStateRepository::save(instance, state).await?) })
    }
}

/// On-disk layout of a state file.
#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u64,
    state: QueueState,
}

/// File-based state store.
///
/// Each instance is one JSON file, replaced atomically on save by writing a
/// temp file, syncing it and renaming it over the old one.
pub struct FileStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Last version seen per instance.
    versions: Mutex<HashMap<String, u64>>,
}

impl FileStateStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed.
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            versions: Mutex::new(HashMap::new()),
        })
    }

    /// Store with the default data directory.
    pub async fn default_dir() -> Result<Self, PersistenceError> {
        Self::open("./data/coordinator").await
    }

    fn path(&self, instance: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", instance))
    }

    async fn read(&self, instance: &str) -> Result<Option<StateFile>, PersistenceError> {
        let json = match fs::read_to_string(self.path(instance)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write `contents` to `temp_path`, then rename it over `path` and sync the
    /// directory so the rename survives a crash.
    async fn replace(&self, temp_path: &Path, path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        fs::rename(temp_path, path).await?;

        #[cfg(unix)]
        fs::File::open(&self.base_dir).await?.sync_all().await?;
        Ok(())
    }

    fn remember(&self, instance: &str, version: u64) {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance.to_string(), version);
    }

    async fn next_version(&self, instance: &str) -> Result<u64, PersistenceError> {
        let known = self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance)
            .copied();
        let current = match known {
            Some(version) => version,
            None => self.read(instance).await?.map_or(0, |file| file.version),
        };
        Ok(current + 1)
    }
}

impl StateStore for FileStateStore {
    fn describe(&self) -> String {
        format!("file:{}", self.base_dir.display())
    }

    fn load<'a>(&'a self, instance: &'a str) -> StoreFuture<'a, Option<QueueState>> {
        Box::pin(async move {
            let Some(file) = self.read(instance).await? else {
                return Ok(None);
            };
            self.remember(instance, file.version);
            tracing::debug!("Loaded state from {:?} at version {}", self.path(instance), file.version);
            Ok(Some(file.state))
        })
    }

    fn save<'a>(&'a self, instance: &'a str, state: &'a QueueState) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let version = self.next_version(instance).await?;
            let json = serde_json::to_string_pretty(&StateFile {
                version,
                state: state.clone(),
            })?;

            let path = self.path(instance);
            let temp_path = self.base_dir.join(format!("{}.json.tmp", instance));
            if let Err(e) = self.replace(&temp_path, &path, json.as_bytes()).await {
                if let Err(cleanup) = fs::remove_file(&temp_path).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!("Failed to remove {:?}: {}", temp_path, cleanup);
                }
                return Err(e);
            }

            self.remember(instance, version);
            tracing::debug!("Saved state to {:?} at version {}", path, version);
            Ok(version)
        })
    }
}

/// Volatile store for tests and ephemeral runs.
///
/// Saves can be made to fail on demand to exercise rollback.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, (u64, QueueState)>>,
    saves: AtomicU64,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves across all instances.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent save fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// The state currently held for `instance`.
    pub fn snapshot(&self, instance: &str) -> Option<(u64, QueueState)> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance)
            .cloned()
    }
}

impl StateStore for MemoryStateStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn load<'a>(&'a self, instance: &'a str) -> StoreFuture<'a, Option<QueueState>> {
        Box::pin(async move { Ok(self.snapshot(instance).map(|(_, state)| state)) })
    }

    fn save<'a>(&'a self, instance: &'a str, state: &'a QueueState) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(PersistenceError::Unavailable("saves are disabled".into()));
            }
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            let version = states.get(instance).map_or(0, |(v, _)| *v) + 1;
            states.insert(instance.to_string(), (version, state.clone()));
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(version)
        })
    }
}
