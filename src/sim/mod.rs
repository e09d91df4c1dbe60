//! Simulation-Facing Types
//!
//! The park simulation proper (guest AI, pathfinding, finances) lives outside
//! this crate. The sync layer consumes it through the [`ParkSimulation`]
//! trait and moves opaque [`GameState`] snapshots around without inspecting
//! them.
//!
//! [`ActionSource`] is the re-broadcast guard: every mutation made on behalf
//! of a replicated action is flagged `Remote`, and a simulation's dispatch
//! hook must not forward remote-sourced mutations back into the local
//! action-capture path.

use serde::{Deserialize, Serialize};

pub mod park;

pub use park::ParkWorld;

// =============================================================================
// TOOLS
// =============================================================================

/// Placement tool identifiers shared between peers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// No placement; the default cursor.
    #[default]
    Select,
    /// Footpath tile.
    Path,
    /// Decorative tree.
    Tree,
    /// Flower bed.
    Flower,
    /// Guest bench.
    Bench,
    /// Food stall.
    FoodStall,
    /// Park entrance ticket booth.
    TicketBooth,
    /// Coaster track piece.
    CoasterTrack,
}

impl Tool {
    /// Whether this tool produces `Place` actions that go through the batcher.
    pub fn is_placement(self) -> bool {
        !matches!(self, Tool::Select)
    }
}

// =============================================================================
// SIMULATION SPEED
// =============================================================================

/// Simulation tick speed. Shared across the room, not per-player.
///
/// Serializes as the integers 0..=3 on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SimSpeed {
    /// Simulation paused.
    Paused = 0,
    /// Normal speed.
    #[default]
    Normal = 1,
    /// Double speed.
    Fast = 2,
    /// Quadruple speed.
    Turbo = 3,
}

impl SimSpeed {
    /// Ticks advanced per scheduler step at this speed.
    pub fn ticks_per_step(self) -> u64 {
        match self {
            SimSpeed::Paused => 0,
            SimSpeed::Normal => 1,
            SimSpeed::Fast => 2,
            SimSpeed::Turbo => 4,
        }
    }
}

impl From<SimSpeed> for u8 {
    fn from(speed: SimSpeed) -> u8 {
        speed as u8
    }
}

impl TryFrom<u8> for SimSpeed {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SimSpeed::Paused),
            1 => Ok(SimSpeed::Normal),
            2 => Ok(SimSpeed::Fast),
            3 => Ok(SimSpeed::Turbo),
            other => Err(format!("invalid speed {other}, expected 0..=3")),
        }
    }
}

// =============================================================================
// PARK SETTINGS
// =============================================================================

/// Room-wide park settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParkSettings {
    /// Display name of the park.
    pub park_name: String,
    /// Entry fee in cents.
    pub entry_fee: u32,
    /// Whether guest spawning is paused.
    pub guests_paused: bool,
}

impl Default for ParkSettings {
    fn default() -> Self {
        Self {
            park_name: "Unnamed Park".to_string(),
            entry_fee: 0,
            guests_paused: false,
        }
    }
}

impl ParkSettings {
    /// Merge a partial update. Absent fields keep their current value.
    pub fn merge(&mut self, patch: &ParkSettingsPatch) {
        if let Some(name) = &patch.park_name {
            self.park_name = name.clone();
        }
        if let Some(fee) = patch.entry_fee {
            self.entry_fee = fee;
        }
        if let Some(paused) = patch.guests_paused {
            self.guests_paused = paused;
        }
    }
}

/// Partial park settings, carried by `SetParkSettings` actions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkSettingsPatch {
    /// New park name, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub park_name: Option<String>,
    /// New entry fee, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_fee: Option<u32>,
    /// New guest-spawning flag, if changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guests_paused: Option<bool>,
}

// =============================================================================
// ACTION SOURCE
// =============================================================================

/// Origin of a simulation mutation.
///
/// Remote-sourced mutations must never re-enter the local dispatch path,
/// otherwise two peers relay the same action back and forth forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionSource {
    /// The mutation came from local player input.
    Local,
    /// The mutation replays an action received from another peer.
    Remote,
}

impl ActionSource {
    /// True for replicated mutations.
    pub fn is_remote(self) -> bool {
        matches!(self, ActionSource::Remote)
    }
}

// =============================================================================
// GAME STATE SNAPSHOT
// =============================================================================

/// Full serialized simulation state.
///
/// Opaque to the sync layer: it is produced by `serialize_state`, shipped to
/// peers or storage, and handed back to `load_state`. Deep equality is the
/// only operation this crate performs on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameState(pub serde_json::Value);

impl GameState {
    /// An empty snapshot (JSON null). Used as a placeholder before bootstrap.
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }
}

// =============================================================================
// SIMULATION TRAIT
// =============================================================================

/// The contract the sync layer requires from the park simulation.
///
/// Every mutation is expected to be idempotent: replaying an action against a
/// state that already incorporates it must be a no-op or harmless overwrite.
/// The transport can duplicate messages and may echo a peer's own broadcast
/// back to it.
pub trait ParkSimulation: Send + 'static {
    /// Place `tool` at `(x, y)`. Placing on an occupied tile is a no-op.
    fn place(&mut self, x: i32, y: i32, tool: Tool, source: ActionSource);

    /// Clear the tile at `(x, y)`. Clearing an empty tile is a no-op.
    fn bulldoze(&mut self, x: i32, y: i32, source: ActionSource);

    /// Begin building a coaster. Re-starting the same build is a no-op.
    fn start_coaster_build(&mut self, coaster_type: &str, coaster_id: &str, source: ActionSource);

    /// Complete the in-progress coaster build, if any.
    fn finish_coaster_build(&mut self, source: ActionSource);

    /// Abandon the in-progress coaster build, if any.
    fn cancel_coaster_build(&mut self, source: ActionSource);

    /// Set the shared simulation speed.
    fn set_speed(&mut self, speed: SimSpeed);

    /// Merge partial settings into the park settings.
    fn apply_settings(&mut self, patch: &ParkSettingsPatch);

    /// Currently selected tool (local UI state, not part of the snapshot).
    fn selected_tool(&self) -> Tool;

    /// Select a tool. Used by the applicator to isolate remote placements
    /// from the local player's in-progress selection.
    fn select_tool(&mut self, tool: Tool);

    /// Advance the simulation one scheduler step.
    fn tick(&mut self);

    /// Serialize the full simulation state.
    fn serialize_state(&self) -> Result<GameState, serde_json::Error>;

    /// Replace the full simulation state with a received snapshot.
    fn load_state(&mut self, state: &GameState) -> Result<(), serde_json::Error>;
}
