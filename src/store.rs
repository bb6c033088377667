//! Registry of contact identities and rooms, and its persisted snapshot.

use crate::crypto::Identity;
use crate::room::{DeliveryLink, Room, RoomRecord};
use crate::utils::{MessengerError, Result, RoomError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Contact identities and live rooms of one daemon
#[derive(Default)]
pub struct Store {
    contacts: RwLock<HashMap<String, Identity>>,
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
}

/// Everything needed to bring a daemon back after a restart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Contact identities with their private keys
    pub contacts: Vec<Identity>,
    /// Rooms with their logs and undelivered queues
    pub rooms: Vec<RoomRecord>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contact identity under its fingerprint
    pub fn add_contact(&self, identity: Identity) {
        self.write_contacts().insert(identity.fingerprint(), identity);
    }

    /// Contact identity with this fingerprint
    pub fn contact(&self, fingerprint: &str) -> Option<Identity> {
        self.read_contacts().get(fingerprint).cloned()
    }

    /// Forget a contact identity; existing rooms are unaffected
    pub fn remove_contact(&self, fingerprint: &str) -> Option<Identity> {
        self.write_contacts().remove(fingerprint)
    }

    /// Fingerprints of all contact identities, sorted
    pub fn contact_fingerprints(&self) -> Vec<String> {
        let mut fingerprints: Vec<String> = self.read_contacts().keys().cloned().collect();
        fingerprints.sort();
        fingerprints
    }

    /// Register a room
    ///
    /// # Errors
    ///
    /// Returns `RoomError::AlreadyExists` if a room with the same id is registered
    pub fn register_room(&self, room: Arc<Room>) -> Result<()> {
        let mut rooms = self.write_rooms();
        if rooms.contains_key(&room.id()) {
            return Err(RoomError::AlreadyExists {
                room_id: room.id().to_string(),
            }
            .into());
        }
        rooms.insert(room.id(), room);
        Ok(())
    }

    /// Room with this id
    pub fn room(&self, id: &Uuid) -> Option<Arc<Room>> {
        self.read_rooms().get(id).cloned()
    }

    /// Room with this id, or `RoomError::NotFound`
    pub fn require_room(&self, id: &Uuid) -> Result<Arc<Room>> {
        self.room(id).ok_or_else(|| {
            RoomError::NotFound {
                room_id: id.to_string(),
            }
            .into()
        })
    }

    /// Unregister a room and cancel its delivery work
    pub fn remove_room(&self, id: &Uuid) -> Option<Arc<Room>> {
        let room = self.write_rooms().remove(id)?;
        room.close();
        Some(room)
    }

    /// All registered rooms
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.read_rooms().values().cloned().collect()
    }

    /// Persistable copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        let mut rooms: Vec<RoomRecord> = self.rooms().iter().map(|room| room.record()).collect();
        rooms.sort_by_key(|record| record.id);

        Snapshot {
            contacts: self.read_contacts().values().cloned().collect(),
            rooms,
        }
    }

    /// Rebuild a store from a snapshot; rooms are not started
    pub fn restore(snapshot: Snapshot, link: &DeliveryLink) -> Self {
        let store = Self::new();
        for identity in snapshot.contacts {
            store.add_contact(identity);
        }
        for record in snapshot.rooms {
            let room = Room::restore(record, link.clone());
            store.write_rooms().insert(room.id(), room);
        }
        store
    }

    fn read_contacts(&self) -> RwLockReadGuard<'_, HashMap<String, Identity>> {
        self.contacts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_contacts(&self) -> RwLockWriteGuard<'_, HashMap<String, Identity>> {
        self.contacts.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_rooms(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<Room>>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rooms(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<Room>>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Snapshot {
    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write to `path`, replacing any previous snapshot
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let staging = path.with_extension("tmp");

        std::fs::write(&staging, self.to_json()?)
            .and_then(|()| std::fs::rename(&staging, path))
            .map_err(|e| MessengerError::Storage {
                path: path.display().to_string(),
                reason: format!("write failed: {e}"),
            })?;

        log::debug!("Saved {} room(s) to {}", self.rooms.len(), path.display());
        Ok(())
    }

    /// Read from `path`; a missing file is an empty snapshot
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path).map_err(|e| MessengerError::Storage {
            path: path.display().to_string(),
            reason: format!("read failed: {e}"),
        })?;
        Self::from_json(&json)
    }
}
