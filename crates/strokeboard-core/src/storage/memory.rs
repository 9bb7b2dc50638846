//! In-memory storage.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{BoardSnapshot, BoxFuture, Storage, StorageError, StorageResult};

/// Keeps snapshots in a map. Used for tests and ephemeral boards.
#[derive(Default)]
pub struct MemoryStorage {
    boards: RwLock<HashMap<String, BoardSnapshot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl Storage for MemoryStorage {
    fn save(&self, id: &str, snapshot: &BoardSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            self.boards.write().map_err(lock_error)?.insert(id, snapshot);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<BoardSnapshot>> {
        let id = id.to_string();
        Box::pin(async move {
            let boards = self.boards.read().map_err(lock_error)?;
            boards.get(&id).cloned().ok_or(StorageError::NotFound(id))
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.boards.write().map_err(lock_error)?.remove(&id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move { Ok(self.boards.read().map_err(lock_error)?.keys().cloned().collect()) })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.boards.read().map_err(lock_error)?.contains_key(&id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DrawingEngine;
    use pollster::block_on;

    fn snapshot() -> BoardSnapshot {
        BoardSnapshot::capture(&DrawingEngine::new(), 640, 480)
    }

    #[test]
    fn test_save_and_load() {
        let storage = MemoryStorage::new();
        let board = snapshot();
        block_on(storage.save("board", &board)).unwrap();
        assert_eq!(block_on(storage.load("board")).unwrap(), board);
    }

    #[test]
    fn test_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(block_on(storage.load("missing")), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_list_exists_delete() {
        let storage = MemoryStorage::new();
        let board = snapshot();
        block_on(storage.save("one", &board)).unwrap();
        block_on(storage.save("two", &board)).unwrap();

        let mut list = block_on(storage.list()).unwrap();
        list.sort();
        assert_eq!(list, vec!["one".to_string(), "two".to_string()]);

        block_on(storage.delete("one")).unwrap();
        assert!(!block_on(storage.exists("one")).unwrap());
        assert!(block_on(storage.exists("two")).unwrap());
        block_on(storage.delete("one")).unwrap();
    }
}
