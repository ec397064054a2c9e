//! Room broadcaster: membership, lifecycle events and frame fan-out

pub mod hub;
pub mod join_code;
pub mod outbox;
pub mod room;

pub use hub::{JoinOutcome, RoomHub};
pub use outbox::{Outbound, Outbox};
pub use room::{ConnectionId, Listener, Room, RoomId};
