//! Room table of one relay node
//!
//! Owned by the node's router task, so it is plain single-writer state with
//! no locking. Every member of a room, the host included, maps back to the
//! room through `client_rooms`; that mapping is what routing looks up.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::protocol::RoomDataUpdate;
use crate::types::{ConnectionId, Region, Room};

use super::id::IdGenerator;

/// Host-supplied parameters of a new room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSettings {
    pub app_id: i32,
    pub is_public: bool,
    pub name: String,
    pub data: String,
    /// Zero means unlimited
    pub max_players: i32,
}

/// What happened when a member left
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// A non-host member left; the room lives on
    Left { room_id: String, host_id: ConnectionId },
    /// The host left; the room is gone along with its membership
    Closed(Room),
}

/// All rooms hosted on this node
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    client_rooms: HashMap<ConnectionId, String>,
    region: Region,
}

impl RoomRegistry {
    /// Create an empty registry for a node in `region`
    pub fn new(region: Region) -> Self {
        Self {
            rooms: HashMap::new(),
            client_rooms: HashMap::new(),
            region,
        }
    }

    /// Create a room hosted by `host_id` under an id drawn from `ids`.
    ///
    /// Fails if the host already belongs to a room or no free id is found.
    pub async fn create_room(
        &mut self,
        ids: &IdGenerator,
        host_id: ConnectionId,
        settings: RoomSettings,
    ) -> Result<&Room> {
        if self.client_rooms.contains_key(&host_id) {
            return Err(Error::Validation(format!(
                "connection {} already belongs to a room",
                host_id
            )));
        }

        let rooms = &self.rooms;
        let room_id = ids.generate(|candidate| rooms.contains_key(candidate)).await?;

        let room = Room {
            server_id: room_id.clone(),
            host_id,
            server_name: settings.name,
            server_data: settings.data,
            app_id: settings.app_id,
            region: self.region,
            is_public: settings.is_public,
            max_players: settings.max_players,
            clients: BTreeSet::from([host_id]),
            relay_info: None,
        };

        tracing::info!(
            room = %room_id,
            host = %host_id,
            app_id = room.app_id,
            public = room.is_public,
            "Room created"
        );

        self.client_rooms.insert(host_id, room_id.clone());
        Ok(self.rooms.entry(room_id).or_insert(room))
    }

    /// Add `client_id` to an existing room
    pub fn join_room(&mut self, room_id: &str, client_id: ConnectionId) -> Result<&Room> {
        if self.client_rooms.contains_key(&client_id) {
            return Err(Error::Validation(format!(
                "connection {} already belongs to a room",
                client_id
            )));
        }

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;

        if room.is_full() {
            return Err(Error::Validation(format!("room {} is full", room_id)));
        }

        room.clients.insert(client_id);
        self.client_rooms.insert(client_id, room_id.to_string());

        tracing::debug!(room = %room_id, client = %client_id, "Client joined room");
        Ok(room)
    }

    /// Remove `client_id` from `room_id`.
    ///
    /// When the client is the host the whole room is destroyed. Returns `None`
    /// if the client was not a member of that room.
    pub fn leave_room(&mut self, room_id: &str, client_id: ConnectionId) -> Option<Departure> {
        let room = self.rooms.get_mut(room_id)?;
        if !room.is_member(client_id) {
            return None;
        }

        if room.host_id == client_id {
            return self.destroy_room(room_id).map(Departure::Closed);
        }

        room.clients.remove(&client_id);
        let host_id = room.host_id;
        self.client_rooms.remove(&client_id);

        tracing::debug!(room = %room_id, client = %client_id, "Client left room");
        Some(Departure::Left {
            room_id: room_id.to_string(),
            host_id,
        })
    }

    /// Remove whatever room `client_id` is in
    pub fn leave_current(&mut self, client_id: ConnectionId) -> Option<Departure> {
        let room_id = self.client_rooms.get(&client_id)?.clone();
        self.leave_room(&room_id, client_id)
    }

    /// Destroy a room, detaching every member
    pub fn destroy_room(&mut self, room_id: &str) -> Option<Room> {
        let room = self.rooms.remove(room_id)?;
        for client in &room.clients {
            self.client_rooms.remove(client);
        }

        tracing::info!(
            room = %room_id,
            host = %room.host_id,
            members = room.clients.len(),
            "Room destroyed"
        );
        Some(room)
    }

    /// Apply a host's metadata change
    pub fn update_room(&mut self, room_id: &str, update: RoomDataUpdate) -> Result<&Room> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;

        if let Some(name) = update.name {
            room.server_name = name;
        }
        if let Some(data) = update.data {
            room.server_data = data;
        }
        if let Some(is_public) = update.is_public {
            room.is_public = is_public;
        }
        if let Some(max_players) = update.max_players {
            room.max_players = max_players;
        }

        Ok(room)
    }

    /// Room the client currently belongs to
    pub fn room_for_client(&self, client_id: ConnectionId) -> Option<&Room> {
        self.client_rooms
            .get(&client_id)
            .and_then(|room_id| self.rooms.get(room_id))
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn public_count(&self) -> usize {
        self.rooms.values().filter(|room| room.is_public).count()
    }

    pub fn region(&self) -> Region {
        self.region
    }
}
