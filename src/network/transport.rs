//! Room Transport
//!
//! The seam between the sync layer and the hosted pub/sub service. A
//! [`RoomTransport`] opens one channel per room and hands back a
//! [`RoomLink`]: a publisher handle plus a stream of [`ChannelEvent`]s
//! (presence, messages, the late-join state handoff, errors), delivered
//! asynchronously in arbitrary interleaving relative to local calls.
//!
//! [`MemoryHub`] is the bundled in-process implementation used by the demo
//! binary and the test suite. It is not a network transport: delivery is a
//! channel send, presence is synchronous, and an `unreachable` switch lets
//! tests exercise connection failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::protocol::{Envelope, Player, PlayerId, RoomCode, RoomDescriptor};
use crate::sim::GameState;

// =============================================================================
// EVENTS AND ERRORS
// =============================================================================

/// Asynchronous event on a room channel.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    /// Connection came up (`true`) or dropped (`false`).
    Connection(bool),
    /// Presence changed; carries the full player list.
    Players(Vec<Player>),
    /// A peer published a message.
    Message(Envelope),
    /// The room's current snapshot, handed to late joiners once at join.
    State(GameState),
    /// Transport-level failure, human readable.
    Error(String),
}

/// Failure to open a room channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    /// The transport itself cannot be reached.
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// No room exists for the given code.
    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    /// A room with this code is already live.
    #[error("room {0} already exists")]
    RoomExists(RoomCode),
}

/// Failure to publish on an open channel. Best-effort: callers log and move
/// on, the periodic snapshot push is the self-healing mechanism.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The channel was destroyed or the room is gone.
    #[error("channel closed")]
    Closed,

    /// Payload could not be encoded for the wire.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport rejected the publish.
    #[error("publish failed: {0}")]
    Publish(String),
}

// =============================================================================
// TRANSPORT CONTRACT
// =============================================================================

/// Publisher half of an open room channel.
pub trait RoomPublisher: Send + Sync {
    /// Best-effort broadcast to the other peers in the room.
    fn publish(&self, envelope: Envelope) -> Result<(), SendError>;

    /// Replace the snapshot handed to future late joiners. Host only.
    fn set_room_state(&self, state: GameState) -> Result<(), SendError>;

    /// Leave the room and release the channel. Idempotent.
    fn close(&self);
}

/// An open room channel: publisher plus inbound events.
pub struct RoomLink {
    /// Outbound half.
    pub publisher: Arc<dyn RoomPublisher>,
    /// Inbound events, in delivery order.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens room channels. One implementation per transport backend.
pub trait RoomTransport: Send + Sync {
    /// Create the room and join it as host, seeding the late-join snapshot.
    fn host(
        &self,
        descriptor: &RoomDescriptor,
        player: &Player,
        initial_state: GameState,
    ) -> Result<RoomLink, ConnectError>;

    /// Join an existing room as a guest. Guests never seed state.
    fn join(
        &self,
        code: &RoomCode,
        player: &Player,
    ) -> Result<(RoomLink, RoomDescriptor), ConnectError>;
}

// =============================================================================
// IN-PROCESS HUB
// =============================================================================

struct PeerSlot {
    player: Player,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

struct RoomEntry {
    descriptor: RoomDescriptor,
    state: GameState,
    peers: Vec<PeerSlot>,
}

impl RoomEntry {
    fn players(&self) -> Vec<Player> {
        self.peers.iter().map(|p| p.player.clone()).collect()
    }

    fn broadcast_presence(&self) {
        let players = self.players();
        for peer in &self.peers {
            let _ = peer.tx.send(ChannelEvent::Players(players.clone()));
        }
    }
}

struct HubInner {
    rooms: Mutex<HashMap<RoomCode, RoomEntry>>,
    unreachable: AtomicBool,
}

/// In-process pub/sub hub keyed by room code.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: Mutex::new(HashMap::new()),
                unreachable: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate the transport being unreachable: all connect attempts fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.inner.rooms.lock().expect("hub lock poisoned").len()
    }

    /// Number of peers in a room, if it exists.
    pub fn peer_count(&self, code: &RoomCode) -> Option<usize> {
        self.inner
            .rooms
            .lock()
            .expect("hub lock poisoned")
            .get(code)
            .map(|r| r.peers.len())
    }

    fn check_reachable(&self) -> Result<(), ConnectError> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(ConnectError::Unreachable(
                "realtime service did not respond".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomTransport for MemoryHub {
    fn host(
        &self,
        descriptor: &RoomDescriptor,
        player: &Player,
        initial_state: GameState,
    ) -> Result<RoomLink, ConnectError> {
        self.check_reachable()?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut rooms = self.inner.rooms.lock().expect("hub lock poisoned");
            if rooms.contains_key(&descriptor.code) {
                return Err(ConnectError::RoomExists(descriptor.code.clone()));
            }

            let entry = RoomEntry {
                descriptor: descriptor.clone(),
                state: initial_state,
                peers: vec![PeerSlot { player: player.clone(), tx: tx.clone() }],
            };

            let _ = tx.send(ChannelEvent::Connection(true));
            let _ = tx.send(ChannelEvent::Players(entry.players()));
            rooms.insert(descriptor.code.clone(), entry);
        }

        debug!(room = %descriptor.code, host = %player.id, "room created");
        Ok(RoomLink {
            publisher: Arc::new(HubPublisher {
                hub: self.inner.clone(),
                code: descriptor.code.clone(),
                peer: player.id.clone(),
            }),
            events: rx,
        })
    }

    fn join(
        &self,
        code: &RoomCode,
        player: &Player,
    ) -> Result<(RoomLink, RoomDescriptor), ConnectError> {
        self.check_reachable()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let descriptor = {
            let mut rooms = self.inner.rooms.lock().expect("hub lock poisoned");
            let entry = rooms
                .get_mut(code)
                .ok_or_else(|| ConnectError::RoomNotFound(code.clone()))?;

            entry.peers.push(PeerSlot { player: player.clone(), tx: tx.clone() });

            // Late-join handoff: the joiner gets the room's current snapshot
            // before any live messages.
            let _ = tx.send(ChannelEvent::Connection(true));
            let _ = tx.send(ChannelEvent::State(entry.state.clone()));
            entry.broadcast_presence();
            entry.descriptor.clone()
        };

        debug!(room = %code, peer = %player.id, "peer joined");
        Ok((
            RoomLink {
                publisher: Arc::new(HubPublisher {
                    hub: self.inner.clone(),
                    code: code.clone(),
                    peer: player.id.clone(),
                }),
                events: rx,
            },
            descriptor,
        ))
    }
}

struct HubPublisher {
    hub: Arc<HubInner>,
    code: RoomCode,
    peer: PlayerId,
}

impl RoomPublisher for HubPublisher {
    fn publish(&self, envelope: Envelope) -> Result<(), SendError> {
        let rooms = self.hub.rooms.lock().expect("hub lock poisoned");
        let entry = rooms.get(&self.code).ok_or(SendError::Closed)?;

        for peer in entry.peers.iter().filter(|p| p.player.id != self.peer) {
            if peer.tx.send(ChannelEvent::Message(envelope.clone())).is_err() {
                warn!(room = %self.code, peer = %peer.player.id, "dropped message for dead peer");
            }
        }
        Ok(())
    }

    fn set_room_state(&self, state: GameState) -> Result<(), SendError> {
        let mut rooms = self.hub.rooms.lock().expect("hub lock poisoned");
        let entry = rooms.get_mut(&self.code).ok_or(SendError::Closed)?;
        entry.state = state;
        Ok(())
    }

    fn close(&self) {
        let mut rooms = self.hub.rooms.lock().expect("hub lock poisoned");
        let Some(entry) = rooms.get_mut(&self.code) else {
            return;
        };

        entry.peers.retain(|p| p.player.id != self.peer);
        if entry.peers.is_empty() {
            // Last peer out: the transport destroys the room.
            rooms.remove(&self.code);
            debug!(room = %self.code, "room destroyed");
        } else {
            entry.broadcast_presence();
        }
    }
}
