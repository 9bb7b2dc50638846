//! Periodic saving of the current board.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{BoardSnapshot, FileStorage, Storage, StorageResult};

/// Default auto-save interval in seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Key under which the most recently saved board is mirrored.
pub const LAST_BOARD_KEY: &str = "__last_board__";

/// Saves the board when it is dirty and the interval has elapsed.
pub struct AutoSaveManager<S: Storage> {
    storage: Arc<S>,
    interval: Duration,
    last_save: Option<Instant>,
    dirty: bool,
    board_id: Option<String>,
}

impl<S: Storage> AutoSaveManager<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            last_save: None,
            dirty: false,
            board_id: None,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Board id to save under. Defaults to the snapshot's own id.
    pub fn set_board_id(&mut self, id: Option<String>) {
        self.board_id = id;
    }

    pub fn board_id(&self) -> Option<&str> {
        self.board_id.as_deref()
    }

    pub fn should_save(&self, now: Instant) -> bool {
        self.dirty
            && self
                .last_save
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Save if dirty and due. Returns true if a save happened.
    pub async fn maybe_save(&mut self, snapshot: &BoardSnapshot, now: Instant) -> StorageResult<bool> {
        if !self.should_save(now) {
            return Ok(false);
        }
        self.save(snapshot, now).await?;
        Ok(true)
    }

    /// Save immediately, also mirroring the board under [`LAST_BOARD_KEY`].
    pub async fn save(&mut self, snapshot: &BoardSnapshot, now: Instant) -> StorageResult<()> {
        let id = self.board_id.clone().unwrap_or_else(|| snapshot.id.clone());
        self.storage.save(&id, snapshot).await?;
        self.storage.save(LAST_BOARD_KEY, snapshot).await?;
        log::debug!("Auto-saved board {}", id);
        self.board_id = Some(id);
        self.last_save = Some(now);
        self.dirty = false;
        Ok(())
    }

    pub async fn load(&mut self, id: &str) -> StorageResult<BoardSnapshot> {
        let snapshot = self.storage.load(id).await?;
        self.board_id = Some(id.to_string());
        self.dirty = false;
        self.last_save = Some(Instant::now());
        Ok(snapshot)
    }

    /// The most recently saved board, if any.
    pub async fn load_last(&mut self) -> Option<BoardSnapshot> {
        match self.storage.load(LAST_BOARD_KEY).await {
            Ok(snapshot) => {
                self.board_id = Some(snapshot.id.clone());
                self.dirty = false;
                self.last_save = Some(Instant::now());
                Some(snapshot)
            }
            Err(e) => {
                log::debug!("No last board: {}", e);
                None
            }
        }
    }

    /// Saved board ids, without the last-board mirror.
    pub async fn list_boards(&self) -> StorageResult<Vec<String>> {
        let mut ids = self.storage.list().await?;
        ids.retain(|id| id != LAST_BOARD_KEY && !id.starts_with("__"));
        Ok(ids)
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

/// An auto-save manager over [`FileStorage::default_location`].
pub fn create_autosave_manager() -> StorageResult<AutoSaveManager<FileStorage>> {
    Ok(AutoSaveManager::new(Arc::new(FileStorage::default_location()?)))
}
