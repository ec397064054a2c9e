//! Network plumbing: the host's TCP listener and the listener's room
//! channel client

pub mod client;
pub mod listener;

pub use client::{ExitReason, Flow, ListenerClient, ListenerSession, ListenerStats};
pub use listener::{bind_tcp, resolve_bind_addr};
