//! Room membership table and frame fan-out
//!
//! One lock guards rooms, join codes and connections together, so join,
//! leave, publish and room lifecycle changes are serialized against each
//! other. Publishing only pushes into per-connection [`Outbox`]es and never
//! waits on a socket; per-room publish order is therefore the order every
//! member's outbox sees.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use super::join_code;
use super::outbox::Outbox;
use super::room::{ConnectionId, Listener, Room, RoomId};
use crate::audio::format::Frame;
use crate::config::BroadcastConfig;
use crate::error::RoomError;
use crate::protocol::ServerEvent;

const DEFAULT_DISPLAY_NAME: &str = "Listener";

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room: Room,
    pub is_streaming: bool,
}

struct RoomEntry {
    room: Room,
    members: Vec<ConnectionId>,
}

impl RoomEntry {
    fn snapshot(&self) -> Room {
        let mut room = self.room.clone();
        room.listener_count = self.members.len();
        room
    }
}

struct ConnectionEntry {
    outbox: Arc<Outbox>,
    address: Option<SocketAddr>,
    membership: Option<Listener>,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<RoomId, RoomEntry>,
    codes: HashMap<String, RoomId>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl Registry {
    fn snapshots(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.values().map(RoomEntry::snapshot).collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        rooms
    }

    fn send_to_room(&self, room_id: RoomId, event: ServerEvent) {
        let Some(entry) = self.rooms.get(&room_id) else {
            return;
        };
        for id in &entry.members {
            if let Some(conn) = self.connections.get(id) {
                conn.outbox.push_event(event.clone());
            }
        }
    }

    fn send_to_all(&self, event: ServerEvent) {
        for conn in self.connections.values() {
            conn.outbox.push_event(event.clone());
        }
    }

    fn lobbies_updated(&self) {
        self.send_to_all(ServerEvent::LobbiesUpdated {
            rooms: self.snapshots(),
        });
    }

    /// Detach `connection` from its room; returns the old membership
    fn detach(&mut self, connection: ConnectionId) -> Option<Listener> {
        let listener = self.connections.get_mut(&connection)?.membership.take()?;
        if let Some(entry) = self.rooms.get_mut(&listener.room_id) {
            entry.members.retain(|id| *id != connection);
        }
        Some(listener)
    }

    fn publish(&self, room_id: RoomId, frame: &Frame) -> usize {
        let Some(entry) = self.rooms.get(&room_id) else {
            return 0;
        };
        entry
            .members
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|conn| conn.outbox.push_frame(frame.clone()))
            .count()
    }
}

/// Room registry and broadcaster, shared by the API and the pump
pub struct RoomHub {
    registry: Mutex<Registry>,
    config: BroadcastConfig,
}

impl RoomHub {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            config,
        }
    }

    /// Register a new transport session and hand back its outbox
    pub fn connect(&self, address: Option<SocketAddr>) -> (ConnectionId, Arc<Outbox>) {
        let id = Uuid::new_v4();
        let outbox = Arc::new(Outbox::new(
            self.config.outbound_frame_capacity,
            self.config.outbound_event_capacity,
        ));

        self.registry.lock().connections.insert(
            id,
            ConnectionEntry {
                outbox: outbox.clone(),
                address,
                membership: None,
            },
        );
        tracing::debug!("Connection {} registered ({:?})", id, address);
        (id, outbox)
    }

    /// Forget a connection, leaving its room first
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut registry = self.registry.lock();
        let left = Self::leave_locked(&mut registry, connection);
        if let Some(conn) = registry.connections.remove(&connection) {
            conn.outbox.close();
        }
        if left.is_some() {
            registry.lobbies_updated();
        }
        tracing::debug!("Connection {} removed", connection);
    }

    pub fn create_room(&self, name: &str) -> Result<Room, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::EmptyName);
        }

        let mut registry = self.registry.lock();
        let code = join_code::generate_unique(&mut rand::thread_rng(), |c| {
            registry.codes.contains_key(c)
        })
        .ok_or_else(|| RoomError::InvalidJoinCode("join code space exhausted".to_string()))?;

        let room = Room {
            id: Uuid::new_v4(),
            join_code: code.clone(),
            name: name.to_string(),
            is_streaming: false,
            listener_count: 0,
            created_at: Utc::now(),
        };

        registry.codes.insert(code, room.id);
        registry.rooms.insert(
            room.id,
            RoomEntry {
                room: room.clone(),
                members: Vec::new(),
            },
        );
        registry.lobbies_updated();

        tracing::info!("Room created: {} [{}]", room.name, room.join_code);
        Ok(room)
    }

    pub fn rename_room(&self, room_id: RoomId, name: &str) -> Result<Room, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::EmptyName);
        }

        let mut registry = self.registry.lock();
        let entry = registry
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        entry.room.name = name.to_string();
        let room = entry.snapshot();

        registry.send_to_all(ServerEvent::RoomRenamed {
            room_id,
            new_name: room.name.clone(),
        });
        registry.lobbies_updated();

        tracing::info!("Room {} renamed to {}", room_id, room.name);
        Ok(room)
    }

    /// Close a room: members get `stream-stopped` (when streaming) then
    /// `room-closed`, and are detached.
    pub fn close_room(&self, room_id: RoomId, reason: Option<&str>) -> Result<Room, RoomError> {
        let mut registry = self.registry.lock();
        let room = Self::close_locked(&mut registry, room_id, reason)?;
        registry.lobbies_updated();
        Ok(room)
    }

    fn close_locked(
        registry: &mut Registry,
        room_id: RoomId,
        reason: Option<&str>,
    ) -> Result<Room, RoomError> {
        let snapshot = registry
            .rooms
            .get(&room_id)
            .map(RoomEntry::snapshot)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;

        if snapshot.is_streaming {
            registry.send_to_room(room_id, ServerEvent::StreamStopped { room_id });
        }
        registry.send_to_room(
            room_id,
            ServerEvent::RoomClosed {
                room_id,
                name: snapshot.name.clone(),
                reason: reason.map(str::to_string),
            },
        );

        if let Some(entry) = registry.rooms.remove(&room_id) {
            for id in entry.members {
                if let Some(conn) = registry.connections.get_mut(&id) {
                    conn.membership = None;
                }
            }
            registry.codes.remove(&entry.room.join_code);
        }

        tracing::info!("Room closed: {} [{}]", snapshot.name, snapshot.join_code);
        Ok(snapshot)
    }

    /// Join the room behind `code`, leaving any previous room.
    ///
    /// The `join-room-result` is queued on the connection before the lock
    /// is released, so it precedes every frame of the room and carries the
    /// current streaming flag.
    pub fn join(
        &self,
        connection: ConnectionId,
        code: &str,
        display_name: &str,
    ) -> Result<JoinOutcome, RoomError> {
        let mut registry = self.registry.lock();
        let outbox = registry
            .connections
            .get(&connection)
            .map(|c| c.outbox.clone())
            .ok_or(RoomError::UnknownConnection)?;

        let room_id = match registry.codes.get(code) {
            Some(id) if join_code::is_valid(code) => *id,
            _ => {
                outbox.push_event(ServerEvent::join_failed("Invalid join code"));
                return Err(RoomError::InvalidJoinCode(code.to_string()));
            }
        };

        let previous = Self::leave_locked(&mut registry, connection);
        if let Some(previous) = &previous {
            if previous.room_id == room_id {
                tracing::debug!("{} re-joined {}", previous.display_name, room_id);
            }
        }

        let display_name = match display_name.trim() {
            "" => DEFAULT_DISPLAY_NAME.to_string(),
            name => name.to_string(),
        };

        let address = registry.connections.get(&connection).and_then(|c| c.address);
        let listener = Listener {
            connection_id: connection,
            room_id,
            display_name: display_name.clone(),
            address,
            joined_at: Utc::now(),
        };

        let room = {
            let entry = registry
                .rooms
                .get_mut(&room_id)
                .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
            entry.members.push(connection);
            entry.snapshot()
        };
        if let Some(conn) = registry.connections.get_mut(&connection) {
            conn.membership = Some(listener);
        }

        outbox.push_event(ServerEvent::join_ok(room.clone()));
        if room.is_streaming {
            outbox.push_event(ServerEvent::StreamStarted { room_id });
        }

        registry.send_to_all(ServerEvent::ListenerJoined {
            room_id,
            display_name: display_name.clone(),
        });
        registry.lobbies_updated();

        tracing::info!(
            "Listener joined: {} ({:?}) -> {} [{}]",
            display_name,
            address,
            room.name,
            room.join_code
        );

        Ok(JoinOutcome {
            is_streaming: room.is_streaming,
            room,
        })
    }

    /// Leave the current room. Never changes the room's streaming state.
    pub fn leave(&self, connection: ConnectionId) -> Option<RoomId> {
        let mut registry = self.registry.lock();
        let listener = Self::leave_locked(&mut registry, connection)?;
        registry.lobbies_updated();
        Some(listener.room_id)
    }

    fn leave_locked(registry: &mut Registry, connection: ConnectionId) -> Option<Listener> {
        let listener = registry.detach(connection)?;
        registry.send_to_all(ServerEvent::ListenerDisconnected {
            room_id: listener.room_id,
            display_name: listener.display_name.clone(),
        });
        tracing::info!("Listener left: {} from {}", listener.display_name, listener.room_id);
        Some(listener)
    }

    /// Toggle a room's streaming flag. Returns whether it changed; members
    /// are told with `stream-started` / `stream-stopped` on change.
    pub fn set_streaming(&self, room_id: RoomId, streaming: bool) -> Result<bool, RoomError> {
        let mut registry = self.registry.lock();
        let changed = Self::set_streaming_locked(&mut registry, room_id, streaming)?;
        if changed {
            registry.lobbies_updated();
        }
        Ok(changed)
    }

    fn set_streaming_locked(
        registry: &mut Registry,
        room_id: RoomId,
        streaming: bool,
    ) -> Result<bool, RoomError> {
        let entry = registry
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        if entry.room.is_streaming == streaming {
            return Ok(false);
        }
        entry.room.is_streaming = streaming;

        let event = if streaming {
            ServerEvent::StreamStarted { room_id }
        } else {
            ServerEvent::StreamStopped { room_id }
        };
        registry.send_to_room(room_id, event);
        Ok(true)
    }

    /// Stop every streaming room with `stream-error` then `stream-stopped`.
    /// Returns the rooms affected.
    pub fn fail_streaming(&self, error: &str) -> Vec<RoomId> {
        let mut registry = self.registry.lock();
        let streaming: Vec<RoomId> = registry
            .rooms
            .values()
            .filter(|e| e.room.is_streaming)
            .map(|e| e.room.id)
            .collect();

        for room_id in &streaming {
            registry.send_to_room(
                *room_id,
                ServerEvent::StreamError {
                    room_id: *room_id,
                    error: error.to_string(),
                },
            );
            let _ = Self::set_streaming_locked(&mut registry, *room_id, false);
        }
        if !streaming.is_empty() {
            registry.lobbies_updated();
        }
        streaming
    }

    /// Stop every streaming room with a plain `stream-stopped`
    pub fn stop_all_streaming(&self) -> Vec<RoomId> {
        let mut registry = self.registry.lock();
        let streaming: Vec<RoomId> = registry
            .rooms
            .values()
            .filter(|e| e.room.is_streaming)
            .map(|e| e.room.id)
            .collect();
        for room_id in &streaming {
            let _ = Self::set_streaming_locked(&mut registry, *room_id, false);
        }
        if !streaming.is_empty() {
            registry.lobbies_updated();
        }
        streaming
    }

    /// Fan a frame out to every member of `room_id`; returns receivers
    pub fn publish(&self, room_id: RoomId, frame: &Frame) -> usize {
        self.registry.lock().publish(room_id, frame)
    }

    /// Fan a frame out to every streaming room under one lock.
    /// Returns the rooms it was published to.
    pub fn publish_streaming(&self, frame: &Frame) -> Vec<RoomId> {
        let registry = self.registry.lock();
        let mut published = Vec::new();
        for entry in registry.rooms.values().filter(|e| e.room.is_streaming) {
            registry.publish(entry.room.id, frame);
            published.push(entry.room.id);
        }
        published
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.registry.lock().snapshots()
    }

    pub fn room(&self, room_id: RoomId) -> Option<Room> {
        self.registry.lock().rooms.get(&room_id).map(RoomEntry::snapshot)
    }

    pub fn room_by_code(&self, code: &str) -> Option<Room> {
        let registry = self.registry.lock();
        let id = registry.codes.get(code)?;
        registry.rooms.get(id).map(RoomEntry::snapshot)
    }

    pub fn listeners(&self, room_id: RoomId) -> Result<Vec<Listener>, RoomError> {
        let registry = self.registry.lock();
        let entry = registry
            .rooms
            .get(&room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;
        Ok(entry
            .members
            .iter()
            .filter_map(|id| registry.connections.get(id))
            .filter_map(|conn| conn.membership.clone())
            .collect())
    }

    pub fn streaming_rooms(&self) -> Vec<RoomId> {
        self.registry
            .lock()
            .rooms
            .values()
            .filter(|e| e.room.is_streaming)
            .map(|e| e.room.id)
            .collect()
    }

    /// Room a connection is currently joined to
    pub fn membership(&self, connection: ConnectionId) -> Option<RoomId> {
        self.registry
            .lock()
            .connections
            .get(&connection)?
            .membership
            .as_ref()
            .map(|l| l.room_id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Close every room with `reason`, tell all connections the server is
    /// going away, and close their outboxes.
    pub fn shutdown(&self, reason: &str) {
        let mut registry = self.registry.lock();
        let ids: Vec<RoomId> = registry.rooms.keys().copied().collect();
        for room_id in ids {
            let _ = Self::close_locked(&mut registry, room_id, Some(reason));
        }
        registry.send_to_all(ServerEvent::ServerShutdown {
            message: reason.to_string(),
        });
        for conn in registry.connections.values() {
            conn.outbox.close();
        }
        tracing::info!("Room hub shut down: {}", reason);
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}
