//! Remote Action Applicator
//!
//! Replays a peer's action against the local simulation. The match over
//! [`Action`] is exhaustive, so a new action kind without a handler fails to
//! compile. Every branch flags its mutations [`ActionSource::Remote`] and
//! must stay idempotent: the transport can duplicate messages or echo a
//! peer's own broadcast back to it.
//!
//! Placement branches isolate tool state: the local player's in-progress
//! tool selection is saved, swapped for the remote tool, and restored, so a
//! replay never corrupts what the local user is holding.

use tracing::trace;

use crate::sim::{ActionSource, ParkSimulation};
use crate::sync::action::{Action, RemoteAction};

/// Apply a received action to the local simulation.
pub fn apply<S: ParkSimulation + ?Sized>(remote: &RemoteAction, sim: &mut S) {
    trace!(player = %remote.player_id, "applying remote action");
    apply_action(&remote.action, sim);
}

/// Apply an action by value, independent of its envelope.
pub fn apply_action<S: ParkSimulation + ?Sized>(action: &Action, sim: &mut S) {
    match action {
        Action::Place { x, y, tool } => {
            let previous = sim.selected_tool();
            sim.select_tool(*tool);
            sim.place(*x, *y, *tool, ActionSource::Remote);
            sim.select_tool(previous);
        }

        Action::PlaceBatch { placements } => {
            let previous = sim.selected_tool();
            for p in placements {
                sim.select_tool(p.tool);
                sim.place(p.x, p.y, p.tool, ActionSource::Remote);
            }
            sim.select_tool(previous);
        }

        Action::Bulldoze { x, y } => {
            sim.bulldoze(*x, *y, ActionSource::Remote);
        }

        Action::StartCoasterBuild { coaster_type, coaster_id } => {
            sim.start_coaster_build(coaster_type, coaster_id, ActionSource::Remote);
        }

        Action::FinishCoasterBuild => {
            sim.finish_coaster_build(ActionSource::Remote);
        }

        Action::CancelCoasterBuild => {
            sim.cancel_coaster_build(ActionSource::Remote);
        }

        Action::SetSpeed { speed } => {
            // Speed is shared across the room, not per-player.
            sim.set_speed(*speed);
        }

        Action::SetParkSettings { settings } => {
            sim.apply_settings(settings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ParkSettingsPatch, ParkWorld, SimSpeed, Tool};
    use crate::sync::action::Placement;
    use proptest::prelude::*;

    fn seeded_world() -> ParkWorld {
        let mut park = ParkWorld::new();
        park.place(0, 0, Tool::Path, crate::sim::ActionSource::Local);
        park.place(1, 0, Tool::Tree, crate::sim::ActionSource::Local);
        park.start_coaster_build("wooden", "c-seed", crate::sim::ActionSource::Local);
        park
    }

    #[test]
    fn place_restores_local_tool_selection() {
        let mut park = ParkWorld::new();
        park.select_tool(Tool::FoodStall);

        apply_action(&Action::Place { x: 4, y: 4, tool: Tool::Tree }, &mut park);

        assert_eq!(park.selected_tool(), Tool::FoodStall);
        assert_eq!(park.tile(4, 4), Some(Tool::Tree));
    }

    #[test]
    fn batch_restores_tool_once_at_end() {
        let mut park = ParkWorld::new();
        park.select_tool(Tool::Bench);

        let placements = vec![
            Placement { x: 0, y: 1, tool: Tool::Path },
            Placement { x: 0, y: 2, tool: Tool::Flower },
        ];
        apply_action(&Action::PlaceBatch { placements }, &mut park);

        assert_eq!(park.selected_tool(), Tool::Bench);
        assert_eq!(park.tile(0, 1), Some(Tool::Path));
        assert_eq!(park.tile(0, 2), Some(Tool::Flower));
    }

    #[test]
    fn replayed_place_does_not_clobber_existing_tile() {
        let mut park = seeded_world();
        apply_action(&Action::Place { x: 0, y: 0, tool: Tool::Bench }, &mut park);
        assert_eq!(park.tile(0, 0), Some(Tool::Path));
    }

    #[test]
    fn settings_merge_applies_partial_fields() {
        let mut park = ParkWorld::new();
        apply_action(
            &Action::SetParkSettings {
                settings: ParkSettingsPatch { entry_fee: Some(900), ..Default::default() },
            },
            &mut park,
        );
        assert_eq!(park.settings().entry_fee, 900);
        assert_eq!(park.settings().park_name, "Unnamed Park");
    }

    // Strategy over the full closed action set.
    fn arb_tool() -> impl Strategy<Value = Tool> {
        prop_oneof![
            Just(Tool::Path),
            Just(Tool::Tree),
            Just(Tool::Flower),
            Just(Tool::Bench),
            Just(Tool::FoodStall),
            Just(Tool::TicketBooth),
            Just(Tool::CoasterTrack),
        ]
    }

    fn arb_speed() -> impl Strategy<Value = SimSpeed> {
        prop_oneof![
            Just(SimSpeed::Paused),
            Just(SimSpeed::Normal),
            Just(SimSpeed::Fast),
            Just(SimSpeed::Turbo),
        ]
    }

    fn arb_placement() -> impl Strategy<Value = Placement> {
        (-20..20i32, -20..20i32, arb_tool()).prop_map(|(x, y, tool)| Placement { x, y, tool })
    }

    fn arb_action() -> impl Strategy<Value = Action> {
        prop_oneof![
            arb_placement().prop_map(|p| Action::Place { x: p.x, y: p.y, tool: p.tool }),
            proptest::collection::vec(arb_placement(), 0..12)
                .prop_map(|placements| Action::PlaceBatch { placements }),
            (-20..20i32, -20..20i32).prop_map(|(x, y)| Action::Bulldoze { x, y }),
            ("[a-z]{1,8}", "[a-z0-9-]{1,8}").prop_map(|(t, id)| Action::StartCoasterBuild {
                coaster_type: t,
                coaster_id: id,
            }),
            Just(Action::FinishCoasterBuild),
            Just(Action::CancelCoasterBuild),
            arb_speed().prop_map(|speed| Action::SetSpeed { speed }),
            (
                proptest::option::of("[a-z ]{1,12}"),
                proptest::option::of(0..5000u32),
                proptest::option::of(any::<bool>()),
            )
                .prop_map(|(park_name, entry_fee, guests_paused)| Action::SetParkSettings {
                    settings: ParkSettingsPatch { park_name, entry_fee, guests_paused },
                }),
        ]
    }

    proptest! {
        // Applying any action twice yields the same snapshot as applying it
        // once, starting from identical state.
        #[test]
        fn every_action_is_idempotent(action in arb_action()) {
            let mut once = seeded_world();
            apply_action(&action, &mut once);

            let mut twice = seeded_world();
            apply_action(&action, &mut twice);
            apply_action(&action, &mut twice);

            prop_assert_eq!(
                once.serialize_state().unwrap(),
                twice.serialize_state().unwrap()
            );
        }

        // Tool isolation holds for every action kind.
        #[test]
        fn local_tool_survives_any_remote_action(action in arb_action()) {
            let mut park = seeded_world();
            park.select_tool(Tool::TicketBooth);
            apply_action(&action, &mut park);
            prop_assert_eq!(park.selected_tool(), Tool::TicketBooth);
        }
    }
}
