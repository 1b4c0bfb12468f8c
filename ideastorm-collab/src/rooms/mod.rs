mod connection;
mod room;

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use log::info;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use connection::*;
pub use room::*;

/// How long a room survives with no participants before it is destroyed.
pub const EVICTION_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq)]
pub enum RoomError {
    #[error("Idea not found")]
    IdeaNotFound,
}

/// The single source of truth for room existence and membership.
///
/// Also acts as the connection registry: the reverse mapping from
/// connection to room, used uniformly by graceful leaves and abrupt
/// disconnects.
pub struct RoomManager {
    me: Weak<Self>,

    rooms: DashMap<String, Arc<Room>>,
    /// connection -> the code of the room it is currently in
    registry: DashMap<ConnectionId, String>,
    /// Pending eviction timers, one per empty room
    evictions: DashMap<String, EvictionTimer>,
    eviction_generation: AtomicCell<u64>,
}

/// A timer knows its own generation, so one that already fired cannot
/// clean up after a timer that replaced it.
struct EvictionTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            rooms: Default::default(),
            registry: Default::default(),
            evictions: Default::default(),
            eviction_generation: AtomicCell::new(0),
        })
    }

    /// Returns the room with this code, creating it if necessary.
    /// Atomic under concurrent joins for the same unseen code.
    pub fn get_or_create(&self, code: &str) -> Arc<Room> {
        self.cancel_eviction(code);

        self.rooms
            .entry(code.to_string())
            .or_insert_with(|| {
                info!("Creating new room: {}", code);
                Arc::new(Room::new(code))
            })
            .value()
            .clone()
    }

    pub fn room(&self, code: &str) -> Option<Arc<Room>> {
        self.rooms.get(code).map(|r| r.value().clone())
    }

    /// The room a connection is currently joined to, if any.
    pub fn room_for(&self, id: ConnectionId) -> Option<Arc<Room>> {
        let code = self.registry.get(&id)?;
        self.room(&code)
    }

    /// Moves a connection into a room, leaving its previous room cleanly.
    /// A second join for the same connection is last-join-wins.
    pub fn attach(&self, connection: &RoomConnection, code: &str) -> Arc<Room> {
        self.detach(connection.id);

        let room = loop {
            let room = self.get_or_create(code);

            if room.join(connection.clone()) {
                break room;
            }

            // The eviction timer claimed this room between the lookup
            // and the join. It is gone from the map, look up again.
        };

        self.registry.insert(connection.id, code.to_string());

        room
    }

    /// Removes a connection from whatever room it is in. Absence of an
    /// association is a valid no-op. Returns the room it left.
    pub fn detach(&self, id: ConnectionId) -> Option<Arc<Room>> {
        let (_, code) = self.registry.remove(&id)?;
        let room = self.room(&code)?;

        if room.leave(id) {
            self.schedule_eviction(&code);
        }

        Some(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_participants(&self) -> usize {
        self.rooms.iter().map(|r| r.participant_count()).sum()
    }

    /// Arms the delayed destruction of an empty room. Re-arming cancels
    /// the prior timer so rejoin/leave cycles never race destructively.
    fn schedule_eviction(&self, code: &str) {
        self.cancel_eviction(code);

        let generation = self.eviction_generation.fetch_add(1);
        let manager = self.me.clone();
        let code = code.to_string();

        let handle = tokio::spawn({
            let code = code.clone();
            async move {
                tokio::time::sleep(EVICTION_GRACE).await;

                let Some(manager) = manager.upgrade() else {
                    return;
                };

                // Emptiness is re-checked under the room's own lock and
                // the claim is made in the same step, so a join racing
                // this removal either keeps the room or retries on a
                // fresh one.
                let removed = manager
                    .rooms
                    .remove_if(&code, |_, room| room.close_if_empty());

                if removed.is_some() {
                    info!("Room {} removed (empty)", code);
                }

                // A re-armed timer owns the entry now, leave it alone.
                manager
                    .evictions
                    .remove_if(&code, |_, timer| timer.generation == generation);
            }
        });

        self.evictions
            .insert(code, EvictionTimer { generation, handle });
    }

    fn cancel_eviction(&self, code: &str) {
        if let Some((_, timer)) = self.evictions.remove(code) {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use super::*;
    use crate::util::random_room_code;

    fn new_connection() -> (RoomConnection, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (RoomConnection::new(sender), receiver)
    }

    #[tokio::test]
    async fn test_participant_count_tracks_joins_and_leaves() {
        let manager = RoomManager::new();
        let code = random_room_code();

        let (first, _first_rx) = new_connection();
        let (second, _second_rx) = new_connection();

        manager.attach(&first, &code);
        manager.attach(&second, &code);
        assert_eq!(manager.room(&code).unwrap().participant_count(), 2);

        manager.detach(first.id);
        assert_eq!(manager.room(&code).unwrap().participant_count(), 1);

        // Detaching an unknown connection is a no-op.
        manager.detach(first.id);
        assert_eq!(manager.room(&code).unwrap().participant_count(), 1);

        manager.detach(second.id);
        assert_eq!(manager.room(&code).unwrap().participant_count(), 0);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let manager = RoomManager::new();
        let code = random_room_code();

        let first = manager.get_or_create(&code);
        let second = manager.get_or_create(&code);

        assert!(Arc::ptr_eq(&first, &second), "same code yields same room");
        assert_eq!(manager.room_count(), 1);
    }

    #[tokio::test]
    async fn test_double_join_moves_the_connection() {
        let manager = RoomManager::new();
        let (connection, _rx) = new_connection();

        manager.attach(&connection, "FIRST1");
        manager.attach(&connection, "SECOND");

        assert_eq!(manager.room("FIRST1").unwrap().participant_count(), 0);
        assert_eq!(manager.room("SECOND").unwrap().participant_count(), 1);
        assert_eq!(
            manager.room_for(connection.id).unwrap().code(),
            "SECOND"
        );
    }

    #[tokio::test]
    async fn test_occupied_room_cannot_be_claimed() {
        let manager = RoomManager::new();
        let (connection, _rx) = new_connection();

        manager.attach(&connection, "ABC123");

        let room = manager.room("ABC123").unwrap();
        assert!(!room.close_if_empty(), "occupied rooms stay open");
    }

    #[tokio::test]
    async fn test_join_on_claimed_room_is_refused() {
        let manager = RoomManager::new();
        let room = manager.get_or_create("ABC123");

        assert!(room.close_if_empty());

        let (connection, mut rx) = new_connection();
        assert!(!room.join(connection), "claimed rooms accept nobody");

        assert_eq!(room.participant_count(), 0);
        assert!(rx.try_recv().is_err(), "no snapshot was sent");
    }

    #[tokio::test]
    async fn test_attach_retries_when_eviction_claims_the_room() {
        let manager = RoomManager::new();
        let stale = manager.get_or_create("ABC123");

        // The eviction timer fires between a joiner's lookup and its
        // join: the claim and removal are atomic against the lookup.
        manager
            .rooms
            .remove_if("ABC123", |_, room| room.close_if_empty());

        let (connection, _rx) = new_connection();
        let joined = manager.attach(&connection, "ABC123");

        assert!(!Arc::ptr_eq(&stale, &joined), "a fresh room was created");
        assert_eq!(joined.participant_count(), 1);
        assert_eq!(
            manager.room_for(connection.id).unwrap().code(),
            "ABC123",
            "the connection is fully registered in the replacement room"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_is_evicted_after_grace_period() {
        let manager = RoomManager::new();
        let (connection, _rx) = new_connection();

        manager.attach(&connection, "ABC123");
        manager.detach(connection.id);

        // Let the eviction task register its timer before advancing.
        tokio::task::yield_now().await;
        tokio::time::advance(EVICTION_GRACE + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(manager.room("ABC123").is_none(), "room should be evicted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_cancels_pending_eviction() {
        let manager = RoomManager::new();
        let (connection, _rx) = new_connection();

        manager.attach(&connection, "ABC123");
        manager.detach(connection.id);
        tokio::task::yield_now().await;

        // Rejoin one second before the timer would fire.
        tokio::time::advance(EVICTION_GRACE - Duration::from_secs(1)).await;
        let (rejoiner, _rejoiner_rx) = new_connection();
        manager.attach(&rejoiner, "ABC123");

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert!(
            manager.room("ABC123").is_some(),
            "room should survive a rejoin before the grace period ends"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_that_regains_then_loses_participants_is_evicted_once() {
        let manager = RoomManager::new();

        let (first, _first_rx) = new_connection();
        manager.attach(&first, "ABC123");
        manager.detach(first.id);
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(30)).await;

        let (second, _second_rx) = new_connection();
        manager.attach(&second, "ABC123");
        manager.detach(second.id);
        tokio::task::yield_now().await;

        // The first timer was cancelled on rejoin, only the re-armed one
        // counts, so the room is still alive 40s after the first leave.
        tokio::time::advance(Duration::from_secs(40)).await;
        tokio::task::yield_now().await;
        assert!(manager.room("ABC123").is_some());

        tokio::time::advance(EVICTION_GRACE).await;
        tokio::task::yield_now().await;
        assert!(manager.room("ABC123").is_none());
    }
}
