use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use scribble_common::phase::PhaseTimings;
use scribble_common::protocol::RoomResponse;
use scribble_common::words::WordSource;

use crate::room::Room;

pub const MIN_ROOM_SIZE: u8 = 2;
pub const MAX_ROOM_SIZE: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Room already exists.")]
    AlreadyExists,
    #[error("The minimum room size is {}.", MIN_ROOM_SIZE)]
    TooSmall,
    #[error("The maximum room size is {}.", MAX_ROOM_SIZE)]
    TooLarge,
}

/// Every room on this server, by name.
pub struct RoomDirectory {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    timings: PhaseTimings,
    words: Arc<dyn WordSource>,
}

impl RoomDirectory {
    pub fn new(timings: PhaseTimings, words: Arc<dyn WordSource>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            timings,
            words,
        }
    }

    /// Checks and inserts under one write lock, so concurrent creators of
    /// the same name see exactly one success.
    pub async fn create_room(
        &self,
        name: &str,
        max_players: u8,
    ) -> Result<Arc<Room>, DirectoryError> {
        let mut rooms = self.rooms.write().await;
        let entry = match rooms.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(DirectoryError::AlreadyExists),
            Entry::Vacant(entry) => entry,
        };
        if max_players < MIN_ROOM_SIZE {
            return Err(DirectoryError::TooSmall);
        }
        if max_players > MAX_ROOM_SIZE {
            return Err(DirectoryError::TooLarge);
        }

        let room = Room::new(
            name.to_string(),
            max_players,
            self.timings,
            self.words.clone(),
        );
        entry.insert(room.clone());
        tracing::info!("Room created: '{}' (max {} players)", name, max_players);
        Ok(room)
    }

    pub async fn get_room(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Rooms whose name contains `query`, ignoring case, sorted by name.
    pub async fn search_rooms(&self, query: &str) -> Vec<RoomResponse> {
        let query = query.to_lowercase();
        let matching: Vec<Arc<Room>> = self
            .rooms
            .read()
            .await
            .values()
            .filter(|room| room.name().to_lowercase().contains(&query))
            .cloned()
            .collect();

        let mut rooms = Vec::with_capacity(matching.len());
        for room in matching {
            rooms.push(room.info().await);
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }
}
