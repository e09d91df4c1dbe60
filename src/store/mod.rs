//! Snapshot Storage
//!
//! Compression of full-state snapshots and the persistence seam for saved
//! rooms. Compression runs on a background worker with a synchronous
//! fallback; persistence is a trait so the backend can be swapped without
//! touching the session layer.

pub mod compress;
pub mod persist;

pub use compress::{SnapshotCodec, WorkerError, WORKER_TIMEOUT};
pub use persist::{
    MemoryRoomStore, PersistError, SavedRoomRecord, SavedRoomStore, AUTOSAVE_KEY,
    MAX_GAME_STATE_BYTES,
};
