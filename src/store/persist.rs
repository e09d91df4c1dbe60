//! Saved Room Store
//!
//! Persistence seam for the host's saved-rooms index and the local autosave
//! slot. Records hold the compressed snapshot bytes produced by the codec;
//! the store never inspects them. Backends enforce the hard size cap on the
//! compressed payload before writing, so an oversized park fails loudly at
//! save time instead of corrupting the index.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::protocol::RoomCode;

/// Hard cap on a persisted snapshot, compressed: 20 MiB.
pub const MAX_GAME_STATE_BYTES: usize = 20 * 1024 * 1024;

/// Key of the local autosave slot.
pub const AUTOSAVE_KEY: &str = "autosave";

/// One entry in the saved-rooms index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedRoomRecord {
    /// Room the save belongs to.
    pub code: RoomCode,
    /// Human-readable room name.
    pub display_name: String,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Compressed snapshot bytes, opaque to the store.
    pub game_state: Vec<u8>,
}

/// Persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The compressed snapshot exceeds [`MAX_GAME_STATE_BYTES`].
    #[error("snapshot is {size} bytes, over the {MAX_GAME_STATE_BYTES} byte cap")]
    StateTooLarge {
        /// Size of the rejected payload.
        size: usize,
    },

    /// The backing storage failed.
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Backend for saved rooms and the autosave slot.
pub trait SavedRoomStore: Send + Sync {
    /// Insert or replace the record for its room code.
    fn upsert(&self, record: SavedRoomRecord) -> Result<(), PersistError>;

    /// Fetch a saved room, if present.
    fn get(&self, code: &RoomCode) -> Result<Option<SavedRoomRecord>, PersistError>;

    /// Drop a saved room. Removing an absent code is not an error.
    fn remove(&self, code: &RoomCode) -> Result<(), PersistError>;

    /// All saved rooms, newest first.
    fn list(&self) -> Result<Vec<SavedRoomRecord>, PersistError>;

    /// Replace the autosave slot.
    fn write_autosave(&self, game_state: Vec<u8>) -> Result<(), PersistError>;

    /// Read the autosave slot, if one exists.
    fn read_autosave(&self) -> Result<Option<Vec<u8>>, PersistError>;
}

/// Reject payloads over the persisted-snapshot cap.
fn check_size(payload: &[u8]) -> Result<(), PersistError> {
    if payload.len() > MAX_GAME_STATE_BYTES {
        return Err(PersistError::StateTooLarge { size: payload.len() });
    }
    Ok(())
}

#[derive(Default)]
struct StoreInner {
    rooms: HashMap<String, SavedRoomRecord>,
    autosave: Option<Vec<u8>>,
}

/// In-memory [`SavedRoomStore`]. The default backend, and the one tests use.
#[derive(Default)]
pub struct MemoryRoomStore {
    inner: Mutex<StoreInner>,
}

impl MemoryRoomStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SavedRoomStore for MemoryRoomStore {
    fn upsert(&self, record: SavedRoomRecord) -> Result<(), PersistError> {
        check_size(&record.game_state)?;
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.rooms.insert(record.code.as_str().to_string(), record);
        Ok(())
    }

    fn get(&self, code: &RoomCode) -> Result<Option<SavedRoomRecord>, PersistError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.rooms.get(code.as_str()).cloned())
    }

    fn remove(&self, code: &RoomCode) -> Result<(), PersistError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.rooms.remove(code.as_str());
        Ok(())
    }

    fn list(&self) -> Result<Vec<SavedRoomRecord>, PersistError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut records: Vec<SavedRoomRecord> = inner.rooms.values().cloned().collect();
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(records)
    }

    fn write_autosave(&self, game_state: Vec<u8>) -> Result<(), PersistError> {
        check_size(&game_state)?;
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.autosave = Some(game_state);
        Ok(())
    }

    fn read_autosave(&self) -> Result<Option<Vec<u8>>, PersistError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.autosave.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, name: &str, payload: Vec<u8>) -> SavedRoomRecord {
        SavedRoomRecord {
            code: RoomCode::parse(code).unwrap(),
            display_name: name.to_string(),
            saved_at: Utc::now(),
            game_state: payload,
        }
    }

    #[test]
    fn upsert_replaces_by_room_code() {
        let store = MemoryRoomStore::new();
        store.upsert(record("AAAAAA", "First", vec![1])).unwrap();
        store.upsert(record("AAAAAA", "Second", vec![2])).unwrap();

        let code = RoomCode::parse("AAAAAA").unwrap();
        let saved = store.get(&code).unwrap().unwrap();
        assert_eq!(saved.display_name, "Second");
        assert_eq!(saved.game_state, vec![2]);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn oversized_snapshot_is_rejected() {
        let store = MemoryRoomStore::new();
        let oversized = vec![0u8; MAX_GAME_STATE_BYTES + 1];

        let err = store.upsert(record("BBBBBB", "Too Big", oversized.clone())).unwrap_err();
        assert!(matches!(err, PersistError::StateTooLarge { size } if size > MAX_GAME_STATE_BYTES));

        assert!(matches!(
            store.write_autosave(oversized),
            Err(PersistError::StateTooLarge { .. })
        ));
        assert!(store.read_autosave().unwrap().is_none());
    }

    #[test]
    fn snapshot_at_cap_is_accepted() {
        let store = MemoryRoomStore::new();
        store.write_autosave(vec![0u8; MAX_GAME_STATE_BYTES]).unwrap();
        assert_eq!(store.read_autosave().unwrap().unwrap().len(), MAX_GAME_STATE_BYTES);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = MemoryRoomStore::new();
        let code = RoomCode::parse("CCCCCC").unwrap();
        store.upsert(record("CCCCCC", "Gone Soon", vec![9])).unwrap();

        store.remove(&code).unwrap();
        store.remove(&code).unwrap();
        assert!(store.get(&code).unwrap().is_none());
    }

    #[test]
    fn list_is_newest_first() {
        let store = MemoryRoomStore::new();
        let mut older = record("DDDDDD", "Older", vec![1]);
        older.saved_at = Utc::now() - chrono::Duration::minutes(5);
        store.upsert(older).unwrap();
        store.upsert(record("EEEEEE", "Newer", vec![2])).unwrap();

        let names: Vec<String> =
            store.list().unwrap().into_iter().map(|r| r.display_name).collect();
        assert_eq!(names, vec!["Newer", "Older"]);
    }
}
