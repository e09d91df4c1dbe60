//! Networking Layer
//!
//! Everything that touches the room channel: wire protocol types, the
//! transport seam, and the per-room channel provider. Nothing in here knows
//! about the simulation beyond the opaque `GameState` snapshot.

pub mod channel;
pub mod protocol;
pub mod transport;

pub use channel::{ChannelProvider, ChannelSignal, Role};
pub use protocol::{Envelope, Player, PlayerId, RoomCode, RoomDescriptor, WirePayload};
pub use transport::{ChannelEvent, ConnectError, MemoryHub, RoomLink, RoomTransport, SendError};
