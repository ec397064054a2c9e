//! Room and listener records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Room identifier
pub type RoomId = Uuid;

/// Transport session identifier, one per WebSocket
pub type ConnectionId = Uuid;

/// Snapshot of a room as sent to clients and the control API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub join_code: String,
    pub name: String,
    pub is_streaming: bool,
    pub listener_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A connection's membership in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub connection_id: ConnectionId,
    pub room_id: RoomId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<SocketAddr>,
    pub joined_at: DateTime<Utc>,
}
