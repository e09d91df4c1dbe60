//! Snapshot Broadcaster
//!
//! Throttle policy for the host's periodic full-state pushes: a 2 s floor
//! for the room-wide resync broadcast and a 10 s floor for the saved-rooms
//! index write. Floors are enforced by last-sent timestamps rather than
//! timers, so a burst of calls collapses to one send and an idle host sends
//! nothing at all.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between room-wide state pushes.
pub const SNAPSHOT_PUSH_FLOOR: Duration = Duration::from_secs(2);

/// Minimum spacing between saved-rooms index writes.
pub const ROOM_INDEX_FLOOR: Duration = Duration::from_secs(10);

/// Last-sent bookkeeping for the two snapshot cadences.
#[derive(Debug, Default)]
pub struct SnapshotBroadcaster {
    last_push: Option<Instant>,
    last_index: Option<Instant>,
}

impl SnapshotBroadcaster {
    /// Fresh broadcaster; the first offer on each cadence always fires.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a room-wide push is due now. Marks the cadence when it is.
    pub fn try_mark_push(&mut self, now: Instant) -> bool {
        if self.last_push.is_some_and(|last| now.duration_since(last) < SNAPSHOT_PUSH_FLOOR) {
            return false;
        }
        self.last_push = Some(now);
        true
    }

    /// Whether a saved-rooms index write is due now. Marks the cadence when
    /// it is.
    pub fn try_mark_index(&mut self, now: Instant) -> bool {
        if self.last_index.is_some_and(|last| now.duration_since(last) < ROOM_INDEX_FLOOR) {
            return false;
        }
        self.last_index = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_offer_always_fires() {
        let mut broadcaster = SnapshotBroadcaster::new();
        let now = Instant::now();
        assert!(broadcaster.try_mark_push(now));
        assert!(broadcaster.try_mark_index(now));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_push() {
        let mut broadcaster = SnapshotBroadcaster::new();

        assert!(broadcaster.try_mark_push(Instant::now()));
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(50)).await;
            assert!(!broadcaster.try_mark_push(Instant::now()));
        }

        tokio::time::advance(SNAPSHOT_PUSH_FLOOR).await;
        assert!(broadcaster.try_mark_push(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn index_floor_is_slower_than_push_floor() {
        let mut broadcaster = SnapshotBroadcaster::new();

        assert!(broadcaster.try_mark_push(Instant::now()));
        assert!(broadcaster.try_mark_index(Instant::now()));

        // After the push floor has elapsed the index floor still holds.
        tokio::time::advance(SNAPSHOT_PUSH_FLOOR).await;
        assert!(broadcaster.try_mark_push(Instant::now()));
        assert!(!broadcaster.try_mark_index(Instant::now()));

        tokio::time::advance(ROOM_INDEX_FLOOR).await;
        assert!(broadcaster.try_mark_index(Instant::now()));
    }
}
