//! Channel Provider
//!
//! One room's channel, wrapped for the sync layer. Host mode seeds the
//! late-join snapshot; guest mode never publishes state on its own. Outbound
//! calls are fire-and-forget; inbound raw envelopes are decoded into typed
//! [`ChannelSignal`]s on a background task, with malformed or unknown
//! payloads dropped under a logged warning.
//!
//! Known gap: there is no heartbeat. A connection that hangs without ever
//! raising a transport error stays apparently connected until the next send
//! or snapshot push fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::network::protocol::{
    ControlMessage, Envelope, Player, PlayerId, RoomCode, RoomDescriptor, WirePayload,
};
use crate::network::transport::{
    ChannelEvent, ConnectError, RoomPublisher, RoomTransport, SendError,
};
use crate::sim::GameState;
use crate::sync::action::{Action, RemoteAction};

/// Role of this peer on the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Created the room and seeds its state.
    Host,
    /// Joined an existing room.
    Guest,
}

/// Typed inbound signal, as consumed by the session coordinator.
#[derive(Clone, Debug)]
pub enum ChannelSignal {
    /// Connection came up or dropped.
    ConnectionChanged(bool),
    /// Presence changed; full player list.
    PlayersChanged(Vec<Player>),
    /// A peer's action, ready for the applicator.
    RemoteAction(RemoteAction),
    /// A full snapshot arrived (late-join bootstrap or periodic resync).
    StateReceived(GameState),
    /// Transport-level failure, human readable.
    TransportError(String),
}

/// Handle to one open room channel.
///
/// Cheap to clone; all clones share the underlying channel and the
/// idempotent destroy flag.
pub struct ChannelProvider {
    publisher: Arc<dyn RoomPublisher>,
    local_id: PlayerId,
    room_code: RoomCode,
    role: Role,
    destroyed: Arc<AtomicBool>,
    decode_task: Arc<JoinHandle<()>>,
}

impl Clone for ChannelProvider {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
            local_id: self.local_id.clone(),
            room_code: self.room_code.clone(),
            role: self.role,
            destroyed: self.destroyed.clone(),
            decode_task: self.decode_task.clone(),
        }
    }
}

impl ChannelProvider {
    /// Open a channel in host mode, creating the room and seeding
    /// `initial_state` for late joiners.
    pub fn create(
        transport: &dyn RoomTransport,
        descriptor: &RoomDescriptor,
        player: &Player,
        initial_state: GameState,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelSignal>), ConnectError> {
        let link = transport.host(descriptor, player, initial_state)?;
        Ok(Self::wire(link.publisher, link.events, player, &descriptor.code, Role::Host))
    }

    /// Open a channel in guest mode. Does not publish a snapshot itself.
    pub fn join(
        transport: &dyn RoomTransport,
        code: &RoomCode,
        player: &Player,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelSignal>, RoomDescriptor), ConnectError> {
        let (link, descriptor) = transport.join(code, player)?;
        let (provider, signals) =
            Self::wire(link.publisher, link.events, player, code, Role::Guest);
        Ok((provider, signals, descriptor))
    }

    fn wire(
        publisher: Arc<dyn RoomPublisher>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        player: &Player,
        code: &RoomCode,
        role: Role,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let decode_task = tokio::spawn(decode_loop(events, signal_tx, player.id.clone()));

        (
            Self {
                publisher,
                local_id: player.id.clone(),
                room_code: code.clone(),
                role,
                destroyed: Arc::new(AtomicBool::new(false)),
                decode_task: Arc::new(decode_task),
            },
            signal_rx,
        )
    }

    /// This peer's role on the channel.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The room this channel is scoped to.
    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    /// Best-effort publish of one action. No delivery confirmation.
    pub fn dispatch_action(&self, action: &Action) -> Result<(), SendError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        let envelope =
            Envelope::new(self.local_id.clone(), &WirePayload::Action(action.clone()))?;
        self.publisher.publish(envelope)
    }

    /// Best-effort broadcast of a full snapshot. In host mode this also
    /// refreshes the late-join seed held by the transport.
    pub fn update_game_state(&self, state: &GameState) -> Result<(), SendError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        let envelope = Envelope::new(
            self.local_id.clone(),
            &WirePayload::Control(ControlMessage::State { state: state.clone() }),
        )?;
        self.publisher.publish(envelope)?;

        if self.role == Role::Host {
            self.publisher.set_room_state(state.clone())?;
        }
        Ok(())
    }

    /// Leave the channel and stop decoding. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.publisher.close();
        self.decode_task.abort();
        debug!(room = %self.room_code, "channel destroyed");
    }
}

/// Translate raw channel events into typed signals.
///
/// Messages from this peer's own id are skipped (some transports echo
/// broadcasts to the sender); the applicator stays idempotent regardless.
async fn decode_loop(
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    local_id: PlayerId,
) {
    while let Some(event) = events.recv().await {
        let signal = match event {
            ChannelEvent::Connection(up) => Some(ChannelSignal::ConnectionChanged(up)),
            ChannelEvent::Players(players) => Some(ChannelSignal::PlayersChanged(players)),
            ChannelEvent::State(state) => Some(ChannelSignal::StateReceived(state)),
            ChannelEvent::Error(message) => Some(ChannelSignal::TransportError(message)),
            ChannelEvent::Message(envelope) => {
                if envelope.sender == local_id {
                    None
                } else {
                    match envelope.decode() {
                        Ok(WirePayload::Action(action)) => {
                            Some(ChannelSignal::RemoteAction(RemoteAction {
                                action,
                                player_id: envelope.sender,
                                sent_at: envelope.sent_at,
                            }))
                        }
                        Ok(WirePayload::Control(ControlMessage::Presence { players })) => {
                            Some(ChannelSignal::PlayersChanged(players))
                        }
                        Ok(WirePayload::Control(ControlMessage::State { state })) => {
                            Some(ChannelSignal::StateReceived(state))
                        }
                        Err(e) => {
                            warn!(sender = %envelope.sender, error = %e, "dropping malformed message");
                            None
                        }
                    }
                }
            }
        };

        if let Some(signal) = signal {
            if signals.send(signal).is_err() {
                break;
            }
        }
    }
}
