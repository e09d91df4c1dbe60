//! Park Sync Demo
//!
//! Two players building one park over the in-process hub: host creates a
//! room, a guest joins and bootstraps, both edit, the host pushes a
//! snapshot, everyone converges.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use park_sync::{
    sim::ActionSource,
    store::MemoryRoomStore,
    sync::{Action, SessionCoordinator},
    MemoryHub, ParkSimulation, ParkWorld, Tool, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Park Sync v{}", VERSION);
    demo_session().await
}

/// Walk one host and one guest through a full session.
async fn demo_session() -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");
    let hub = MemoryHub::new();

    let mut host = SessionCoordinator::new(
        Arc::new(hub.clone()),
        Arc::new(MemoryRoomStore::new()),
        ParkWorld::new(),
        "Avery",
    );

    // The host lays out an entrance before anyone joins.
    {
        let sim = host.sim();
        let mut sim = sim.lock().await;
        for x in 0..5 {
            sim.place(x, 0, Tool::Path, ActionSource::Local);
        }
        sim.place(0, 1, Tool::TicketBooth, ActionSource::Local);
    }

    let code = host
        .create_room("Demo Gardens")
        .await
        .context("room creation failed")?;
    info!("Room code: {code}");

    let mut guest = SessionCoordinator::new(
        Arc::new(hub.clone()),
        Arc::new(MemoryRoomStore::new()),
        ParkWorld::new(),
        "Kim",
    );
    guest
        .join_room(code.as_str())
        .await
        .context("join failed")?;
    settle().await;

    let bootstrapped = guest.sim().lock().await.tile_count();
    info!("Guest bootstrapped with {bootstrapped} tiles");

    // Both sides edit. Local mutation first, then dispatch.
    for x in 0..5 {
        host.sim()
            .lock()
            .await
            .place(x, 2, Tool::Tree, ActionSource::Local);
        host.dispatch_action(&Action::Place { x, y: 2, tool: Tool::Tree });
    }
    guest
        .sim()
        .lock()
        .await
        .place(2, 3, Tool::FoodStall, ActionSource::Local);
    guest.dispatch_action(&Action::Place { x: 2, y: 3, tool: Tool::FoodStall });

    guest.sim().lock().await.start_coaster_build("wooden", "coaster-1", ActionSource::Local);
    guest.dispatch_action(&Action::StartCoasterBuild {
        coaster_type: "wooden".to_string(),
        coaster_id: "coaster-1".to_string(),
    });
    settle().await;

    // Host's periodic duties: snapshot push plus the saved-rooms write.
    host.update_game_state().await;
    settle().await;

    let host_tiles = host.sim().lock().await.tile_count();
    let guest_tiles = guest.sim().lock().await.tile_count();
    info!("Host sees {host_tiles} tiles, guest sees {guest_tiles}");

    let host_state = host.sim().lock().await.serialize_state()?;
    let guest_state = guest.sim().lock().await.serialize_state()?;
    if host_state == guest_state {
        info!("Parks converged");
    } else {
        info!("Parks diverged (next snapshot push repairs this)");
    }

    let saved = host.restore_autosave().await?;
    info!("Autosave present: {}", saved.is_some());

    info!("Players in room: {}", host.players().len());
    guest.leave_room();
    settle().await;
    info!("Players after guest left: {}", host.players().len());

    host.shutdown();
    guest.shutdown();
    info!("=== Demo Complete ===");
    Ok(())
}

async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}
