//! Room Protocol
//!
//! Wire-visible identity and message types for one room's pub/sub channel.
//! All messages are JSON-shaped `{type, ...fields}` objects: the action
//! union plus the `presence` and `state` control kinds. Channel identity is
//! the uppercase six-character room code.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::sim::GameState;
use crate::sync::action::Action;

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Alphabet room codes are drawn from.
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Hex colors assigned to joining players.
pub const PLAYER_COLORS: &[&str] = &[
    "#E53935", "#8E24AA", "#3949AB", "#039BE5", "#00897B", "#7CB342", "#FB8C00", "#6D4C41",
];

// =============================================================================
// ROOM CODE
// =============================================================================

/// Rejected room code input.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid room code {input:?}: expected {ROOM_CODE_LEN} letters or digits")]
pub struct InvalidRoomCode {
    /// The offending input, as given.
    pub input: String,
}

/// Six uppercase alphanumeric characters identifying a room.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse user input, normalizing to uppercase.
    pub fn parse(input: &str) -> Result<Self, InvalidRoomCode> {
        let normalized = input.trim().to_ascii_uppercase();
        let valid = normalized.len() == ROOM_CODE_LEN
            && normalized.bytes().all(|b| ROOM_CODE_CHARSET.contains(&b));
        if !valid {
            return Err(InvalidRoomCode { input: input.to_string() });
        }
        Ok(Self(normalized))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PLAYERS
// =============================================================================

/// Unique peer identifier (UUID string on the wire).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing id string.
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One connected peer, as tracked by presence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Unique identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// `#RRGGBB` display color.
    pub color: String,
    /// When this peer joined the room.
    pub joined_at: DateTime<Utc>,
}

impl Player {
    /// Create a player with a fresh id, a palette color, and `joined_at` now.
    pub fn new(name: impl Into<String>) -> Self {
        let color = PLAYER_COLORS[rand::thread_rng().gen_range(0..PLAYER_COLORS.len())];
        Self {
            id: PlayerId::random(),
            name: name.into(),
            color: color.to_string(),
            joined_at: Utc::now(),
        }
    }
}

/// Room identity and display metadata. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    /// Channel identity.
    pub code: RoomCode,
    /// Host-chosen display name.
    pub display_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl RoomDescriptor {
    /// Create a descriptor with a fresh code and `created_at` now.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            code: RoomCode::generate(),
            display_name: display_name.into(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// WIRE MESSAGES
// =============================================================================

/// Non-action message kinds on the room channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Full player list, pushed on every presence change.
    Presence {
        /// Everyone currently in the room.
        players: Vec<Player>,
    },
    /// Full state snapshot, pushed by the host for bootstrap and resync.
    State {
        /// The serialized simulation state.
        state: GameState,
    },
}

/// Any message published on a room channel.
///
/// Untagged at the outer level so the wire JSON carries exactly one `type`
/// field: the action's own tag or a control kind. The tag sets are disjoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePayload {
    /// A `presence` or `state` message.
    Control(ControlMessage),
    /// A replicated world edit.
    Action(Action),
}

impl WirePayload {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Transport envelope around one published payload.
///
/// The payload stays raw JSON here; the channel provider parses it and drops
/// anything malformed with a logged warning, never an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Publishing peer.
    pub sender: PlayerId,
    /// Wall-clock send time stamped by the sender.
    pub sent_at: DateTime<Utc>,
    /// Raw message JSON.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload, stamping the sender and the current time.
    pub fn new(sender: PlayerId, payload: &WirePayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            sender,
            sent_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Parse the raw payload back into a typed message.
    pub fn decode(&self) -> Result<WirePayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
