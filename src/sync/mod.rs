//! State Synchronization
//!
//! The replication core: the action union and its wire forms, outbound
//! batching, idempotent remote replay, snapshot cadence, and the session
//! coordinator tying them to a room channel.

pub mod action;
pub mod applicator;
pub mod batcher;
pub mod session;
pub mod snapshot;

pub use action::{Action, Placement, RemoteAction};
pub use batcher::{ActionBatcher, ActionSink, BATCH_FLUSH_INTERVAL, BATCH_MAX_SIZE};
pub use session::{ConnectionState, SessionCoordinator, SyncError, DISPATCH_DEBOUNCE};
pub use snapshot::{SnapshotBroadcaster, ROOM_INDEX_FLOOR, SNAPSHOT_PUSH_FLOOR};
