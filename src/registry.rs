//! Process-wide map of live rooms, owned by the server application.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::RoomConfig;
use crate::room::Room;
use crate::scheduler::{spawn_room, RoomHandle};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub players: usize,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

struct RoomEntry {
    handle: RoomHandle,
    created_at: DateTime<Utc>,
}

pub struct RoomRegistry {
    config: RoomConfig,
    fixed_seed: Option<u32>,
    rooms: HashMap<String, RoomEntry>,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            fixed_seed: None,
            rooms: HashMap::new(),
        }
    }

    /// Every room created from now on uses `seed` instead of a random one.
    pub fn with_fixed_seed(mut self, seed: Option<u32>) -> Self {
        self.fixed_seed = seed;
        self
    }

    /// The running room for `room_id`, starting one if none is alive.
    pub fn get_or_create(&mut self, room_id: &str) -> RoomHandle {
        self.prune();
        if let Some(entry) = self.rooms.get(room_id) {
            return entry.handle.clone();
        }
        let seed = self.fixed_seed.unwrap_or_else(rand::random);
        let handle = spawn_room(Room::with_defaults(room_id, seed, self.config.clone()));
        info!(room = room_id, seed, live_rooms = self.rooms.len() + 1, "room registered");
        self.rooms.insert(
            room_id.to_string(),
            RoomEntry {
                handle: handle.clone(),
                created_at: Utc::now(),
            },
        );
        handle
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms
            .get(room_id)
            .filter(|entry| !entry.handle.is_destroyed())
            .map(|entry| entry.handle.clone())
    }

    /// Drops rooms whose task has stopped; returns how many went away.
    pub fn prune(&mut self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|id, entry| {
            let alive = !entry.handle.is_destroyed();
            if !alive {
                info!(room = %id, "room unregistered");
            }
            alive
        });
        before - self.rooms.len()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Live rooms, oldest first.
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut entries: Vec<(&String, &RoomEntry)> = self
            .rooms
            .iter()
            .filter(|(_, entry)| !entry.handle.is_destroyed())
            .collect();
        entries.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(b.0)));
        entries
            .into_iter()
            .map(|(id, entry)| RoomSummary {
                id: id.clone(),
                players: entry.handle.player_count(),
                created_at: entry.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .collect()
    }

    pub fn shutdown_all(&mut self) {
        for entry in self.rooms.values() {
            entry.handle.destroy();
        }
        info!(rooms = self.rooms.len(), "all rooms shut down");
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn same_id_shares_a_room_until_it_empties() {
        let mut registry = RoomRegistry::new(RoomConfig::default()).with_fixed_seed(Some(9));
        let first = registry.get_or_create("alpha");
        let again = registry.get_or_create("alpha");
        let other = registry.get_or_create("beta");
        assert_eq!(registry.len(), 2);
        assert_eq!(first.id(), again.id());
        assert_ne!(first.id(), other.id());

        let (tx, _rx) = mpsc::channel(4096);
        let player = first.join("a".to_string(), tx).await.expect("joined");
        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(
            summaries.iter().find(|s| s.id == "alpha").map(|s| s.players),
            Some(1)
        );

        first.leave(player).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.prune(), 1);
        assert!(registry.get("alpha").is_none());
        let fresh = registry.get_or_create("alpha");
        assert!(!fresh.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_room() {
        let mut registry = RoomRegistry::new(RoomConfig::default());
        let a = registry.get_or_create("a");
        let b = registry.get_or_create("b");
        registry.shutdown_all();
        assert!(registry.is_empty());
        assert!(a.is_destroyed() && b.is_destroyed());
    }
}
