//! Reference Park Simulation
//!
//! A deliberately small [`ParkSimulation`] implementation backing the demo
//! binary and the test suite. It models exactly what the sync layer needs to
//! observe: an idempotent tile grid, one in-progress coaster build, the
//! shared speed, and park settings. BTreeMap keeps snapshot serialization
//! order deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ActionSource, GameState, ParkSettings, ParkSettingsPatch, ParkSimulation, SimSpeed, Tool};

/// An in-progress coaster build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoasterBuild {
    /// Coaster model identifier (e.g. `"wooden"`, `"inverted"`).
    pub coaster_type: String,
    /// Unique identifier of this coaster instance.
    pub coaster_id: String,
}

/// Serialized snapshot shape of [`ParkWorld`].
///
/// Tiles are flattened to a sorted list because JSON map keys must be
/// strings. The selected tool is per-player UI state and deliberately not
/// part of the snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct ParkWorldState {
    tiles: Vec<PlacedTile>,
    coaster_build: Option<CoasterBuild>,
    completed_coasters: Vec<String>,
    speed: SimSpeed,
    settings: ParkSettings,
    ticks: u64,
}

/// One occupied tile in the snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PlacedTile {
    x: i32,
    y: i32,
    tool: Tool,
}

/// Minimal park world.
#[derive(Clone, Debug, Default)]
pub struct ParkWorld {
    tiles: BTreeMap<(i32, i32), Tool>,
    coaster_build: Option<CoasterBuild>,
    completed_coasters: Vec<String>,
    speed: SimSpeed,
    settings: ParkSettings,
    ticks: u64,
    selected: Tool,
}

impl ParkWorld {
    /// Create an empty park.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool occupying `(x, y)`, if any.
    pub fn tile(&self, x: i32, y: i32) -> Option<Tool> {
        self.tiles.get(&(x, y)).copied()
    }

    /// Number of occupied tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Current shared speed.
    pub fn speed(&self) -> SimSpeed {
        self.speed
    }

    /// Current settings.
    pub fn settings(&self) -> &ParkSettings {
        &self.settings
    }

    /// The in-progress coaster build, if any.
    pub fn coaster_build(&self) -> Option<&CoasterBuild> {
        self.coaster_build.as_ref()
    }

    /// Identifiers of completed coasters, in completion order.
    pub fn completed_coasters(&self) -> &[String] {
        &self.completed_coasters
    }

    /// Elapsed simulation ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl ParkSimulation for ParkWorld {
    fn place(&mut self, x: i32, y: i32, tool: Tool, _source: ActionSource) {
        if !tool.is_placement() {
            return;
        }
        // Occupied tiles keep their contents; replaying a placement is a no-op.
        self.tiles.entry((x, y)).or_insert(tool);
    }

    fn bulldoze(&mut self, x: i32, y: i32, _source: ActionSource) {
        self.tiles.remove(&(x, y));
    }

    fn start_coaster_build(&mut self, coaster_type: &str, coaster_id: &str, _source: ActionSource) {
        let build = CoasterBuild {
            coaster_type: coaster_type.to_string(),
            coaster_id: coaster_id.to_string(),
        };
        if self.coaster_build.as_ref() == Some(&build) {
            return;
        }
        self.coaster_build = Some(build);
    }

    fn finish_coaster_build(&mut self, _source: ActionSource) {
        if let Some(build) = self.coaster_build.take() {
            self.completed_coasters.push(build.coaster_id);
        }
    }

    fn cancel_coaster_build(&mut self, _source: ActionSource) {
        self.coaster_build = None;
    }

    fn set_speed(&mut self, speed: SimSpeed) {
        self.speed = speed;
    }

    fn apply_settings(&mut self, patch: &ParkSettingsPatch) {
        self.settings.merge(patch);
    }

    fn selected_tool(&self) -> Tool {
        self.selected
    }

    fn select_tool(&mut self, tool: Tool) {
        self.selected = tool;
    }

    fn tick(&mut self) {
        self.ticks += self.speed.ticks_per_step();
    }

    fn serialize_state(&self) -> Result<GameState, serde_json::Error> {
        let state = ParkWorldState {
            tiles: self
                .tiles
                .iter()
                .map(|(&(x, y), &tool)| PlacedTile { x, y, tool })
                .collect(),
            coaster_build: self.coaster_build.clone(),
            completed_coasters: self.completed_coasters.clone(),
            speed: self.speed,
            settings: self.settings.clone(),
            ticks: self.ticks,
        };
        serde_json::to_value(state).map(GameState)
    }

    fn load_state(&mut self, state: &GameState) -> Result<(), serde_json::Error> {
        let parsed: ParkWorldState = serde_json::from_value(state.0.clone())?;
        self.tiles = parsed
            .tiles
            .into_iter()
            .map(|t| ((t.x, t.y), t.tool))
            .collect();
        self.coaster_build = parsed.coaster_build;
        self.completed_coasters = parsed.completed_coasters;
        self.speed = parsed.speed;
        self.settings = parsed.settings;
        self.ticks = parsed.ticks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ActionSource::{Local, Remote};

    #[test]
    fn place_on_occupied_tile_is_noop() {
        let mut park = ParkWorld::new();
        park.place(2, 3, Tool::Tree, Local);
        park.place(2, 3, Tool::Path, Remote);

        assert_eq!(park.tile(2, 3), Some(Tool::Tree));
        assert_eq!(park.tile_count(), 1);
    }

    #[test]
    fn bulldoze_empty_tile_is_noop() {
        let mut park = ParkWorld::new();
        park.bulldoze(0, 0, Remote);
        assert_eq!(park.tile_count(), 0);
    }

    #[test]
    fn finish_without_build_is_noop() {
        let mut park = ParkWorld::new();
        park.finish_coaster_build(Remote);
        assert!(park.completed_coasters().is_empty());
    }

    #[test]
    fn coaster_build_lifecycle() {
        let mut park = ParkWorld::new();
        park.start_coaster_build("wooden", "c-1", Local);
        assert!(park.coaster_build().is_some());

        // Replaying the same start is a no-op.
        park.start_coaster_build("wooden", "c-1", Remote);
        assert_eq!(park.coaster_build().unwrap().coaster_id, "c-1");

        park.finish_coaster_build(Local);
        assert!(park.coaster_build().is_none());
        assert_eq!(park.completed_coasters(), ["c-1"]);

        // A second finish has nothing to complete.
        park.finish_coaster_build(Remote);
        assert_eq!(park.completed_coasters(), ["c-1"]);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut park = ParkWorld::new();
        park.place(0, 0, Tool::Path, Local);
        park.place(-4, 7, Tool::FoodStall, Local);
        park.start_coaster_build("inverted", "c-9", Local);
        park.set_speed(SimSpeed::Fast);
        park.apply_settings(&ParkSettingsPatch {
            park_name: Some("Roundtrip Gardens".into()),
            ..Default::default()
        });
        park.tick();

        let snapshot = park.serialize_state().unwrap();

        let mut restored = ParkWorld::new();
        restored.load_state(&snapshot).unwrap();

        assert_eq!(restored.serialize_state().unwrap(), snapshot);
        assert_eq!(restored.tile(-4, 7), Some(Tool::FoodStall));
        assert_eq!(restored.speed(), SimSpeed::Fast);
    }

    #[test]
    fn selected_tool_not_in_snapshot() {
        let mut a = ParkWorld::new();
        let mut b = ParkWorld::new();
        a.select_tool(Tool::Tree);
        b.select_tool(Tool::Path);

        assert_eq!(a.serialize_state().unwrap(), b.serialize_state().unwrap());
    }

    #[test]
    fn tick_respects_speed() {
        let mut park = ParkWorld::new();
        park.set_speed(SimSpeed::Paused);
        park.tick();
        assert_eq!(park.ticks(), 0);

        park.set_speed(SimSpeed::Turbo);
        park.tick();
        assert_eq!(park.ticks(), 4);
    }
}
