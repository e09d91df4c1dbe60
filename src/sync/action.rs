//! Replicated Actions
//!
//! The closed set of world edits replicated between peers. Actions are value
//! objects: immutable once constructed, compared by field equality, and safe
//! to replay any number of times (the simulation contract makes every
//! application after the first a no-op or harmless overwrite).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::protocol::PlayerId;
use crate::sim::{ParkSettingsPatch, SimSpeed, Tool};

/// One entry of a coalesced placement batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Tile x coordinate.
    pub x: i32,
    /// Tile y coordinate.
    pub y: i32,
    /// Tool to place.
    pub tool: Tool,
}

/// A discrete world edit, replicated to all peers in the room.
///
/// The set is closed: the applicator matches exhaustively, so adding a
/// variant without a handler is a compile error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Place a single tool on a tile.
    Place {
        /// Tile x coordinate.
        x: i32,
        /// Tile y coordinate.
        y: i32,
        /// Tool to place.
        tool: Tool,
    },

    /// Place a coalesced gesture of tiles, in original order.
    PlaceBatch {
        /// Ordered placements of one user gesture.
        placements: Vec<Placement>,
    },

    /// Clear a tile.
    Bulldoze {
        /// Tile x coordinate.
        x: i32,
        /// Tile y coordinate.
        y: i32,
    },

    /// Begin a coaster build.
    StartCoasterBuild {
        /// Coaster model identifier.
        coaster_type: String,
        /// Unique identifier of the coaster instance.
        coaster_id: String,
    },

    /// Complete the in-progress coaster build.
    FinishCoasterBuild,

    /// Abandon the in-progress coaster build.
    CancelCoasterBuild,

    /// Set the shared simulation speed.
    SetSpeed {
        /// New speed.
        speed: SimSpeed,
    },

    /// Merge partial settings into the park settings.
    SetParkSettings {
        /// Fields to change.
        settings: ParkSettingsPatch,
    },
}

impl Action {
    /// Whether this action goes through the placement batcher.
    pub fn is_place(&self) -> bool {
        matches!(self, Action::Place { .. })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// An action received from another peer, as handed to the applicator.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteAction {
    /// The replicated edit.
    pub action: Action,
    /// Peer that produced it.
    pub player_id: PlayerId,
    /// Wall-clock send time stamped by the sender.
    pub sent_at: DateTime<Utc>,
}
