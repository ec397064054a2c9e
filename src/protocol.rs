//! Room channel wire protocol
//!
//! Control messages travel as JSON text frames tagged by `type`; audio
//! frames travel as binary WebSocket messages carrying exactly one raw PCM
//! frame for the connection's current room.

use serde::{Deserialize, Serialize};

use crate::broadcast::room::{Room, RoomId};

/// Listener to host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom { join_code: String, display_name: String },
    LeaveRoom,
}

/// Host to listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Response to `join-room`; always sent before any frame of the room
    JoinRoomResult {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<Room>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_streaming: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StreamStarted {
        room_id: RoomId,
    },
    StreamStopped {
        room_id: RoomId,
    },
    StreamError {
        room_id: RoomId,
        error: String,
    },
    RoomRenamed {
        room_id: RoomId,
        new_name: String,
    },
    RoomClosed {
        room_id: RoomId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ListenerJoined {
        room_id: RoomId,
        display_name: String,
    },
    ListenerDisconnected {
        room_id: RoomId,
        display_name: String,
    },
    LobbiesUpdated {
        rooms: Vec<Room>,
    },
    ServerShutdown {
        message: String,
    },
    /// Unparseable or unexpected client message
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn join_ok(room: Room) -> Self {
        let is_streaming = room.is_streaming;
        ServerEvent::JoinRoomResult {
            ok: true,
            room: Some(room),
            is_streaming: Some(is_streaming),
            error: None,
        }
    }

    pub fn join_failed(error: impl Into<String>) -> Self {
        ServerEvent::JoinRoomResult {
            ok: false,
            room: None,
            is_streaming: None,
            error: Some(error.into()),
        }
    }

    /// Room the event concerns, if any
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            ServerEvent::StreamStarted { room_id }
            | ServerEvent::StreamStopped { room_id }
            | ServerEvent::StreamError { room_id, .. }
            | ServerEvent::RoomRenamed { room_id, .. }
            | ServerEvent::RoomClosed { room_id, .. }
            | ServerEvent::ListenerJoined { room_id, .. }
            | ServerEvent::ListenerDisconnected { room_id, .. } => Some(*room_id),
            ServerEvent::JoinRoomResult { room, .. } => room.as_ref().map(|r| r.id),
            _ => None,
        }
    }
}

/// `POST /api/rooms`, `PATCH /api/rooms/:id`
#[derive(Debug, Clone, Deserialize)]
pub struct RoomNameRequest {
    pub name: String,
}

/// `POST /api/capture/start`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectSourceRequest {
    pub device_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_client_message_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join-room","joinCode":"048213","displayName":"Ana"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                join_code: "048213".to_string(),
                display_name: "Ana".to_string()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"leave-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveRoom);
    }

    #[test]
    fn test_join_result_carries_streaming_flag() {
        let room = Room {
            id: Uuid::new_v4(),
            join_code: "123456".to_string(),
            name: "Main".to_string(),
            is_streaming: true,
            listener_count: 1,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ServerEvent::join_ok(room)).unwrap();
        assert_eq!(json["type"], "join-room-result");
        assert_eq!(json["ok"], true);
        assert_eq!(json["isStreaming"], true);
        assert_eq!(json["room"]["joinCode"], "123456");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_event_names() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ServerEvent::RoomRenamed {
            room_id: id,
            new_name: "B".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "room-renamed");
        assert_eq!(json["newName"], "B");
        assert_eq!(json["roomId"], id.to_string());

        let text = serde_json::to_string(&ServerEvent::join_failed("Invalid join code")).unwrap();
        let back: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ServerEvent::join_failed("Invalid join code"));
    }
}
