use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use watch_core::{ChatId, NewsItem, Symbol};

use crate::{filter_new, StateError, WatchState};

/// Result of running the novelty filter through the store.
///
/// `items` stands even when `persist_error` is set: the in-memory seen-set was
/// updated, only durability is at risk.
#[derive(Debug)]
pub struct FreshNews {
    pub items: Vec<NewsItem>,
    pub persist_error: Option<StateError>,
}

/// Single shared owner of the persisted watch state.
///
/// Every mutation runs read-modify-persist under one lock, so the scheduler and
/// the command surface never lose each other's writes. When a save fails the
/// in-memory state keeps the change and the error is returned to the caller.
pub struct WatchStore {
    path: PathBuf,
    state: Mutex<WatchState>,
}

impl WatchStore {
    /// Load the state at `path`, falling back to `default` (and persisting it)
    /// when the file is missing or unreadable. Never fails.
    pub async fn open(path: impl Into<PathBuf>, default: WatchState) -> Self {
        let path = path.into();
        let state = load_or_init(&path, default).await;
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> WatchState {
        self.state.lock().await.clone()
    }

    pub async fn list_instruments(&self) -> Vec<Symbol> {
        self.state.lock().await.instruments()
    }

    /// Returns `Ok(false)` without writing if already tracked.
    pub async fn add_instrument(&self, symbol: Symbol) -> Result<bool, StateError> {
        self.mutate(|state| state.add_instrument(symbol)).await
    }

    /// Returns `Ok(false)` without writing if not tracked.
    pub async fn remove_instrument(&self, symbol: &Symbol) -> Result<bool, StateError> {
        self.mutate(|state| state.remove_instrument(symbol)).await
    }

    pub async fn set_destination(&self, chat: ChatId) -> Result<bool, StateError> {
        self.mutate(|state| state.set_destination(chat)).await
    }

    pub async fn mark_news_seen(&self, news_id: &str) -> Result<bool, StateError> {
        self.mutate(|state| state.mark_news_seen(news_id)).await
    }

    pub async fn record_alert(&self, symbol: &Symbol, at: DateTime<Utc>) -> Result<bool, StateError> {
        self.mutate(|state| state.record_alert(symbol, at)).await
    }

    /// Novelty filter with one batch write. Nothing is written when nothing is new.
    pub async fn filter_new_news(&self, items: Vec<NewsItem>) -> FreshNews {
        let mut state = self.state.lock().await;
        let items = filter_new(items, &mut state);

        let persist_error = if items.is_empty() {
            None
        } else {
            save(&self.path, &state).await.err()
        };

        FreshNews { items, persist_error }
    }

    /// Apply `op` and persist if it reports a change.
    async fn mutate<F>(&self, op: F) -> Result<bool, StateError>
    where
        F: FnOnce(&mut WatchState) -> bool,
    {
        let mut state = self.state.lock().await;
        if !op(&mut *state) {
            return Ok(false);
        }
        save(&self.path, &state).await?;
        Ok(true)
    }
}

/// Read and parse the state file.
pub async fn load(path: &Path) -> Result<WatchState, StateError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StateError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the full state atomically: temp file, fsync, rename over the target.
pub async fn save(path: &Path, state: &WatchState) -> Result<(), StateError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = temp_path(path);
    let io_err = |source| StateError::Io {
        path: tmp.clone(),
        source,
    };

    let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
    file.write_all(&bytes).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn load_or_init(path: &Path, default: WatchState) -> WatchState {
    match load(path).await {
        Ok(state) => {
            tracing::info!(
                path = %path.display(),
                instruments = state.instruments.len(),
                seen_news = state.seen_news.len(),
                "Loaded watch state"
            );
            return state;
        }
        Err(StateError::Missing { .. }) => {
            tracing::info!(path = %path.display(), "No state file, initializing defaults");
        }
        Err(e @ StateError::Corrupt { .. }) => {
            tracing::warn!("Discarding corrupt state: {}", e);
        }
        Err(e) => {
            // The file may still hold good state; never overwrite what we could not read.
            tracing::error!("Could not read state, running on in-memory defaults: {}", e);
            return default;
        }
    }

    if let Err(e) = save(path, &default).await {
        tracing::error!("Failed to persist default state: {}", e);
    }
    default
}
