//! # Park Sync
//!
//! Multiplayer state synchronization for a cooperative park-building game.
//! Peers share one room channel; edits replicate as idempotent actions and
//! the host's periodic snapshots bound any divergence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PARK SYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  sim/             - Simulation seam                          │
//! │  ├── mod.rs       - ParkSimulation trait, tools, settings    │
//! │  └── park.rs      - Reference park world                     │
//! │                                                              │
//! │  sync/            - Replication core                         │
//! │  ├── action.rs    - Action union and wire forms              │
//! │  ├── batcher.rs   - Placement batching                       │
//! │  ├── applicator.rs- Idempotent remote replay                 │
//! │  ├── snapshot.rs  - Snapshot push cadence                    │
//! │  └── session.rs   - Session coordinator                      │
//! │                                                              │
//! │  network/         - Room channel                             │
//! │  ├── protocol.rs  - Wire protocol types                      │
//! │  ├── transport.rs - Transport seam + in-process hub          │
//! │  └── channel.rs   - Per-room channel provider                │
//! │                                                              │
//! │  store/           - Snapshot storage                         │
//! │  ├── compress.rs  - Background compression worker            │
//! │  └── persist.rs   - Saved-rooms store                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! Optimistic and eventually consistent:
//! - Local edits apply immediately and publish fire-and-forget
//! - Remote actions replay idempotently, so duplicates are harmless
//! - The host pushes full snapshots on a floored cadence; a received
//!   snapshot replaces local state wholesale (last snapshot wins)
//!
//! There is no rollback and no per-action acknowledgement.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;
pub mod sim;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use network::channel::{ChannelProvider, ChannelSignal, Role};
pub use network::protocol::{Player, PlayerId, RoomCode, RoomDescriptor};
pub use network::transport::{ConnectError, MemoryHub, RoomTransport, SendError};
pub use sim::{ActionSource, GameState, ParkSimulation, ParkWorld, SimSpeed, Tool};
pub use store::compress::SnapshotCodec;
pub use store::persist::{MemoryRoomStore, SavedRoomStore, MAX_GAME_STATE_BYTES};
pub use sync::action::{Action, Placement, RemoteAction};
pub use sync::session::{ConnectionState, SessionCoordinator, SyncError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
