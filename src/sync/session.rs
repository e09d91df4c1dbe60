//! Session Coordinator
//!
//! Owns the lifecycle of one multiplayer session: room create/join/leave,
//! the outbound dispatch path (debounce, then batcher, then channel), the
//! inbound pump (remote actions into the applicator, snapshots into the
//! simulation, presence and errors into the shared view), and the host's
//! periodic snapshot duties.
//!
//! Conflict policy is last-snapshot-wins: a received full snapshot replaces
//! local state wholesale, so any divergence between peers is bounded by the
//! host's push cadence.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::network::channel::{ChannelProvider, ChannelSignal, Role};
use crate::network::protocol::{InvalidRoomCode, Player, RoomCode, RoomDescriptor};
use crate::network::transport::{ConnectError, RoomTransport};
use crate::sim::{GameState, ParkSimulation};
use crate::store::compress::{SnapshotCodec, WorkerError};
use crate::store::persist::{PersistError, SavedRoomRecord, SavedRoomStore};
use crate::sync::action::{Action, Placement};
use crate::sync::applicator;
use crate::sync::batcher::{ActionBatcher, ActionSink};
use crate::sync::snapshot::SnapshotBroadcaster;

/// Identical dispatches inside this window are dropped.
pub const DISPATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Connection lifecycle, as shown to the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not in a room.
    #[default]
    Disconnected,
    /// Connect attempt in flight.
    Connecting,
    /// Live in a room.
    Connected,
    /// The last attempt or the live channel failed; see the error message.
    Error,
}

/// Session-level failure.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The transport refused the connection.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The entered room code is not well formed.
    #[error(transparent)]
    BadRoomCode(#[from] InvalidRoomCode),

    /// A room is already active; leave it first.
    #[error("already in a room")]
    AlreadyInRoom,

    /// The operation needs a live room.
    #[error("not connected to a room")]
    NotConnected,

    /// Snapshot (de)serialization failed.
    #[error("snapshot encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Snapshot compression failed on both paths.
    #[error(transparent)]
    Snapshot(#[from] WorkerError),

    /// The saved-rooms store failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    room: Option<RoomDescriptor>,
    players: Vec<Player>,
    error: Option<String>,
}

struct ActiveRoom {
    provider: ChannelProvider,
    batcher: ActionBatcher,
    broadcaster: SnapshotBroadcaster,
    pump: JoinHandle<()>,
}

/// Sends flushed batches out on the channel, logging failures. Sends are
/// best-effort; the snapshot push repairs any loss.
struct ChannelSink {
    provider: ChannelProvider,
}

impl ActionSink for ChannelSink {
    fn send(&self, action: Action) {
        if let Err(e) = self.provider.dispatch_action(&action) {
            warn!(error = %e, "dropping outbound action");
        }
    }
}

/// Drives one player's multiplayer session.
pub struct SessionCoordinator<S: ParkSimulation> {
    transport: Arc<dyn RoomTransport>,
    store: Arc<dyn SavedRoomStore>,
    codec: SnapshotCodec,
    sim: Arc<tokio::sync::Mutex<S>>,
    local_player: Player,
    shared: Arc<RwLock<Shared>>,
    active: Option<ActiveRoom>,
    last_dispatch: Option<(String, Instant)>,
}

impl<S: ParkSimulation> SessionCoordinator<S> {
    /// New coordinator around `sim`, disconnected.
    pub fn new(
        transport: Arc<dyn RoomTransport>,
        store: Arc<dyn SavedRoomStore>,
        sim: S,
        player_name: &str,
    ) -> Self {
        Self {
            transport,
            store,
            codec: SnapshotCodec::new(),
            sim: Arc::new(tokio::sync::Mutex::new(sim)),
            local_player: Player::new(player_name),
            shared: Arc::new(RwLock::new(Shared::default())),
            active: None,
            last_dispatch: None,
        }
    }

    /// The local player's identity on the wire.
    pub fn local_player(&self) -> &Player {
        &self.local_player
    }

    /// Handle to the simulation, for the UI's local mutations.
    pub fn sim(&self) -> Arc<tokio::sync::Mutex<S>> {
        Arc::clone(&self.sim)
    }

    /// Current connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.read().expect("shared lock poisoned").state
    }

    /// The active room's code, if connected.
    pub fn room_code(&self) -> Option<RoomCode> {
        self.shared
            .read()
            .expect("shared lock poisoned")
            .room
            .as_ref()
            .map(|r| r.code.clone())
    }

    /// Current player roster, empty when disconnected.
    pub fn players(&self) -> Vec<Player> {
        self.shared.read().expect("shared lock poisoned").players.clone()
    }

    /// Human-readable message for the last failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.read().expect("shared lock poisoned").error.clone()
    }

    /// This peer's role, if connected.
    pub fn role(&self) -> Option<Role> {
        self.active.as_ref().map(|a| a.provider.role())
    }

    /// Create a room with a fresh code, seeding it from the current
    /// simulation state. Becomes the host.
    pub async fn create_room(&mut self, display_name: &str) -> Result<RoomCode, SyncError> {
        if self.active.is_some() {
            return Err(SyncError::AlreadyInRoom);
        }

        let descriptor = RoomDescriptor::new(display_name);
        self.set_state(ConnectionState::Connecting, None);

        let seed = match self.sim.lock().await.serialize_state() {
            Ok(seed) => seed,
            Err(e) => {
                self.set_state(ConnectionState::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };
        let created = ChannelProvider::create(
            self.transport.as_ref(),
            &descriptor,
            &self.local_player,
            seed,
        );
        let (provider, signals) = match created {
            Ok(ok) => ok,
            Err(e) => {
                self.set_state(ConnectionState::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };

        info!(room = %descriptor.code, "room created");
        self.activate(provider, signals, descriptor.clone());
        Ok(descriptor.code)
    }

    /// Join an existing room by code. The entered code is normalized before
    /// validation, so lowercase or padded input still matches.
    pub async fn join_room(&mut self, code: &str) -> Result<RoomDescriptor, SyncError> {
        if self.active.is_some() {
            return Err(SyncError::AlreadyInRoom);
        }

        let code = match RoomCode::parse(code) {
            Ok(code) => code,
            Err(e) => {
                self.set_state(ConnectionState::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };

        self.set_state(ConnectionState::Connecting, None);
        let joined = ChannelProvider::join(self.transport.as_ref(), &code, &self.local_player);
        let (provider, signals, descriptor) = match joined {
            Ok(ok) => ok,
            Err(e) => {
                self.set_state(ConnectionState::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };

        info!(room = %code, "joined room");
        self.activate(provider, signals, descriptor.clone());
        Ok(descriptor)
    }

    /// Leave the current room. Safe to call when not in one.
    pub fn leave_room(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        // Last buffered placements go out before the channel drops.
        active.batcher.flush_now();
        active.pump.abort();
        active.provider.destroy();
        self.last_dispatch = None;

        let mut shared = self.shared.write().expect("shared lock poisoned");
        shared.state = ConnectionState::Disconnected;
        shared.room = None;
        shared.players.clear();
        shared.error = None;
        info!("left room");
    }

    /// Publish one local action. Fire-and-forget: failures are logged, never
    /// surfaced, and the snapshot push repairs any loss.
    ///
    /// Placements flow through the batcher; everything else flushes the
    /// batcher first so placements keep their causal position, then goes out
    /// directly.
    pub fn dispatch_action(&mut self, action: &Action) {
        if self.active.is_none() {
            debug!("dispatch while not in a room, ignoring");
            return;
        }
        if self.is_duplicate(action) {
            debug!("debounced duplicate dispatch");
            return;
        }
        let Some(active) = &self.active else {
            return;
        };

        match action {
            Action::Place { x, y, tool } => {
                active.batcher.push(Placement { x: *x, y: *y, tool: *tool });
            }
            other => {
                active.batcher.flush_now();
                if let Err(e) = active.provider.dispatch_action(other) {
                    warn!(error = %e, "dropping outbound action");
                }
            }
        }
    }

    /// Offer the current state for the host's periodic duties: the room-wide
    /// resync push and the saved-rooms index write. No-op for guests; both
    /// cadences are floor-limited, so calling on every mutation is fine.
    pub async fn update_game_state(&mut self) {
        let (push_due, index_due) = {
            let Some(active) = &mut self.active else {
                return;
            };
            if active.provider.role() != Role::Host {
                return;
            }
            let now = Instant::now();
            (active.broadcaster.try_mark_push(now), active.broadcaster.try_mark_index(now))
        };
        if !push_due && !index_due {
            return;
        }

        let state = match self.sim.lock().await.serialize_state() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "snapshot serialize failed, skipping push");
                return;
            }
        };

        if push_due {
            if let Some(active) = &self.active {
                if let Err(e) = active.provider.update_game_state(&state) {
                    warn!(error = %e, "snapshot push failed");
                }
            }
        }

        if index_due {
            if let Err(e) = self.persist_snapshot(&state).await {
                warn!(error = %e, "saved-rooms index write failed");
            }
        }
    }

    /// Read the autosave slot back into a snapshot, if one exists.
    pub async fn restore_autosave(&self) -> Result<Option<GameState>, SyncError> {
        let Some(compressed) = self.store.read_autosave()? else {
            return Ok(None);
        };
        Ok(Some(self.codec.decompress_parse(&compressed).await?))
    }

    /// Shut down the session entirely: leave the room and stop the codec.
    pub fn shutdown(&mut self) {
        self.leave_room();
        self.codec.shutdown();
    }

    async fn persist_snapshot(&self, state: &GameState) -> Result<(), SyncError> {
        let room = self
            .shared
            .read()
            .expect("shared lock poisoned")
            .room
            .clone()
            .ok_or(SyncError::NotConnected)?;

        let compressed = self.codec.serialize_compress(state).await?;
        self.store.write_autosave(compressed.clone())?;
        self.store.upsert(SavedRoomRecord {
            code: room.code,
            display_name: room.display_name,
            saved_at: Utc::now(),
            game_state: compressed,
        })?;
        Ok(())
    }

    /// Drop an action identical to the previous one inside the debounce
    /// window. Identity is the serialized wire form.
    fn is_duplicate(&mut self, action: &Action) -> bool {
        let Ok(key) = serde_json::to_string(action) else {
            return false;
        };
        let now = Instant::now();

        let duplicate = self
            .last_dispatch
            .as_ref()
            .is_some_and(|(last, at)| *last == key && now.duration_since(*at) < DISPATCH_DEBOUNCE);
        if !duplicate {
            self.last_dispatch = Some((key, now));
        }
        duplicate
    }

    fn activate(
        &mut self,
        provider: ChannelProvider,
        signals: tokio::sync::mpsc::UnboundedReceiver<ChannelSignal>,
        descriptor: RoomDescriptor,
    ) {
        let pump = tokio::spawn(pump_signals(
            signals,
            Arc::clone(&self.sim),
            Arc::clone(&self.shared),
        ));

        let batcher = ActionBatcher::new(Arc::new(ChannelSink { provider: provider.clone() }));
        self.active = Some(ActiveRoom {
            provider,
            batcher,
            broadcaster: SnapshotBroadcaster::new(),
            pump,
        });

        let mut shared = self.shared.write().expect("shared lock poisoned");
        shared.state = ConnectionState::Connected;
        shared.room = Some(descriptor);
        shared.players = vec![self.local_player.clone()];
        shared.error = None;
    }

    fn set_state(&self, state: ConnectionState, error: Option<String>) {
        let mut shared = self.shared.write().expect("shared lock poisoned");
        shared.state = state;
        shared.error = error;
    }
}

impl<S: ParkSimulation> Drop for SessionCoordinator<S> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.pump.abort();
            active.provider.destroy();
        }
    }
}

/// Inbound side of the session: applies remote actions, loads snapshots,
/// and mirrors presence and connection changes into the shared view.
async fn pump_signals<S: ParkSimulation>(
    mut signals: tokio::sync::mpsc::UnboundedReceiver<ChannelSignal>,
    sim: Arc<tokio::sync::Mutex<S>>,
    shared: Arc<RwLock<Shared>>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ChannelSignal::ConnectionChanged(up) => {
                let mut shared = shared.write().expect("shared lock poisoned");
                shared.state = if up {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                };
            }
            ChannelSignal::PlayersChanged(players) => {
                shared.write().expect("shared lock poisoned").players = players;
            }
            ChannelSignal::RemoteAction(remote) => {
                let mut sim = sim.lock().await;
                applicator::apply(&remote, &mut *sim);
            }
            ChannelSignal::StateReceived(state) => {
                // Last snapshot wins, wholesale.
                let mut sim = sim.lock().await;
                if let Err(e) = sim.load_state(&state) {
                    warn!(error = %e, "dropping unloadable snapshot");
                }
            }
            ChannelSignal::TransportError(message) => {
                warn!(error = %message, "transport error");
                let mut shared = shared.write().expect("shared lock poisoned");
                shared.state = ConnectionState::Error;
                shared.error = Some(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::{ChannelEvent, MemoryHub};
    use crate::sim::{ActionSource, ParkWorld, Tool};
    use crate::store::persist::MemoryRoomStore;

    fn coordinator(hub: &MemoryHub, name: &str) -> SessionCoordinator<ParkWorld> {
        SessionCoordinator::new(
            Arc::new(hub.clone()),
            Arc::new(MemoryRoomStore::new()),
            ParkWorld::new(),
            name,
        )
    }

    async fn settle() {
        // Let pump tasks and channel deliveries run.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn join_bootstraps_from_host_snapshot() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        {
            let sim = host.sim();
            let mut sim = sim.lock().await;
            sim.place(0, 0, Tool::Path, ActionSource::Local);
            sim.place(1, 0, Tool::Tree, ActionSource::Local);
            sim.start_coaster_build("wooden", "c-1", ActionSource::Local);
        }
        let code = host.create_room("Shared Park").await.unwrap();
        let host_snapshot = host.sim().lock().await.serialize_state().unwrap();

        let mut guest = coordinator(&hub, "guest");
        guest.join_room(code.as_str()).await.unwrap();
        settle().await;

        let guest_snapshot = guest.sim().lock().await.serialize_state().unwrap();
        assert_eq!(guest_snapshot, host_snapshot);
        assert_eq!(guest.connection_state(), ConnectionState::Connected);
        assert_eq!(guest.players().len(), 2);
        assert_eq!(host.players().len(), 2);
    }

    #[tokio::test]
    async fn lowercase_room_code_still_joins() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        let mut guest = coordinator(&hub, "guest");
        let entered = format!("  {}  ", code.as_str().to_lowercase());
        guest.join_room(&entered).await.unwrap();
        assert_eq!(guest.room_code(), Some(code));
    }

    #[tokio::test]
    async fn failed_join_lands_in_error_state_without_panicking() {
        let hub = MemoryHub::new();
        let mut guest = coordinator(&hub, "guest");

        let result = guest.join_room("ZZZZZZ").await;
        assert!(matches!(result, Err(SyncError::Connect(ConnectError::RoomNotFound(_)))));
        assert_eq!(guest.connection_state(), ConnectionState::Error);
        assert!(!guest.last_error().unwrap().is_empty());

        // A malformed code fails before touching the transport.
        let result = guest.join_room("nope").await;
        assert!(matches!(result, Err(SyncError::BadRoomCode(_))));
        assert_eq!(guest.connection_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn unreachable_transport_sets_error_state() {
        let hub = MemoryHub::new();
        hub.set_unreachable(true);

        let mut host = coordinator(&hub, "host");
        let result = host.create_room("Park").await;
        assert!(matches!(result, Err(SyncError::Connect(ConnectError::Unreachable(_)))));
        assert_eq!(host.connection_state(), ConnectionState::Error);
        assert!(!host.last_error().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_actions_mutate_the_peer_simulation() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        let mut guest = coordinator(&hub, "guest");
        guest.join_room(code.as_str()).await.unwrap();
        settle().await;

        guest.dispatch_action(&Action::StartCoasterBuild {
            coaster_type: "steel".to_string(),
            coaster_id: "c-9".to_string(),
        });
        settle().await;

        let host_sim = host.sim();
        let host_sim = host_sim.lock().await;
        assert_eq!(host_sim.coaster_build().map(|b| b.coaster_id.clone()), Some("c-9".into()));
    }

    #[tokio::test]
    async fn identical_dispatches_are_debounced() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        // Raw observer link counts what actually hits the wire.
        let observer = Player::new("observer");
        let (mut link, _) = {
            use crate::network::transport::RoomTransport as _;
            hub.join(&code, &observer).unwrap()
        };
        settle().await;
        while link.events.try_recv().is_ok() {}

        host.dispatch_action(&Action::Bulldoze { x: 3, y: 3 });
        host.dispatch_action(&Action::Bulldoze { x: 3, y: 3 });
        host.dispatch_action(&Action::Bulldoze { x: 3, y: 3 });
        settle().await;

        let mut messages = 0;
        while let Ok(event) = link.events.try_recv() {
            if matches!(event, ChannelEvent::Message(_)) {
                messages += 1;
            }
        }
        assert_eq!(messages, 1);

        // Outside the window the same action goes out again.
        tokio::time::sleep(DISPATCH_DEBOUNCE + Duration::from_millis(20)).await;
        host.dispatch_action(&Action::Bulldoze { x: 3, y: 3 });
        settle().await;
        assert!(matches!(link.events.try_recv(), Ok(ChannelEvent::Message(_))));
    }

    #[tokio::test]
    async fn received_actions_are_not_rebroadcast() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        let mut guest = coordinator(&hub, "guest");
        guest.join_room(code.as_str()).await.unwrap();

        let observer = Player::new("observer");
        let (mut link, _) = {
            use crate::network::transport::RoomTransport as _;
            hub.join(&code, &observer).unwrap()
        };
        settle().await;
        while link.events.try_recv().is_ok() {}

        guest.dispatch_action(&Action::Bulldoze { x: 1, y: 1 });
        settle().await;

        // The host applied it; had it relayed, the observer would see two.
        let mut messages = 0;
        while let Ok(event) = link.events.try_recv() {
            if matches!(event, ChannelEvent::Message(_)) {
                messages += 1;
            }
        }
        assert_eq!(messages, 1);
    }

    #[tokio::test]
    async fn snapshot_push_overrides_diverged_guest_state() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        let mut guest = coordinator(&hub, "guest");
        guest.join_room(code.as_str()).await.unwrap();
        settle().await;

        // Guest diverges locally; host builds the authoritative park.
        guest.sim().lock().await.place(9, 9, Tool::Bench, ActionSource::Local);
        host.sim().lock().await.place(0, 0, Tool::Path, ActionSource::Local);

        host.update_game_state().await;
        settle().await;

        let expected = host.sim().lock().await.serialize_state().unwrap();
        let got = guest.sim().lock().await.serialize_state().unwrap();
        assert_eq!(got, expected, "guest kept diverged state after snapshot");
    }

    #[tokio::test]
    async fn host_snapshot_persists_to_index_and_autosave() {
        let hub = MemoryHub::new();
        let store = Arc::new(MemoryRoomStore::new());
        let mut host = SessionCoordinator::new(
            Arc::new(hub.clone()),
            Arc::clone(&store) as Arc<dyn SavedRoomStore>,
            ParkWorld::new(),
            "host",
        );
        host.sim().lock().await.place(2, 2, Tool::Flower, ActionSource::Local);
        let code = host.create_room("Persisted Park").await.unwrap();

        host.update_game_state().await;
        settle().await;

        let record = store.get(&code).unwrap().expect("no saved room");
        assert_eq!(record.display_name, "Persisted Park");

        let restored = host.restore_autosave().await.unwrap().expect("no autosave");
        let live = host.sim().lock().await.serialize_state().unwrap();
        assert_eq!(restored, live);
    }

    #[tokio::test]
    async fn guests_never_push_snapshots() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        let mut guest = coordinator(&hub, "guest");
        guest.join_room(code.as_str()).await.unwrap();

        let observer = Player::new("observer");
        let (mut link, _) = {
            use crate::network::transport::RoomTransport as _;
            hub.join(&code, &observer).unwrap()
        };
        settle().await;
        while link.events.try_recv().is_ok() {}

        guest.update_game_state().await;
        settle().await;

        assert!(link.events.try_recv().is_err(), "guest pushed a snapshot");
    }

    #[tokio::test]
    async fn leave_room_is_idempotent_and_resets_everything() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();
        assert_eq!(hub.peer_count(&code), Some(1));

        host.leave_room();
        host.leave_room();

        assert_eq!(host.connection_state(), ConnectionState::Disconnected);
        assert!(host.room_code().is_none());
        assert!(host.players().is_empty());
        assert!(host.last_error().is_none());
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn create_while_in_room_is_rejected() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        host.create_room("Park").await.unwrap();

        let result = host.create_room("Another").await;
        assert!(matches!(result, Err(SyncError::AlreadyInRoom)));
        // The live room is untouched.
        assert_eq!(host.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn drag_painting_coalesces_on_the_wire() {
        let hub = MemoryHub::new();
        let mut host = coordinator(&hub, "host");
        let code = host.create_room("Park").await.unwrap();

        let observer = Player::new("observer");
        let (mut link, _) = {
            use crate::network::transport::RoomTransport as _;
            hub.join(&code, &observer).unwrap()
        };
        settle().await;
        while link.events.try_recv().is_ok() {}

        for x in 0..10 {
            host.dispatch_action(&Action::Place { x, y: 0, tool: Tool::Path });
        }
        tokio::time::sleep(crate::sync::batcher::BATCH_FLUSH_INTERVAL * 2).await;

        let mut messages = Vec::new();
        while let Ok(event) = link.events.try_recv() {
            if let ChannelEvent::Message(envelope) = event {
                messages.push(envelope);
            }
        }
        assert_eq!(messages.len(), 1, "placements were not batched");
    }
}
