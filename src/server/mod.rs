//! Host web surface: the HTTP control API and the `/ws` room channel

pub mod handlers;
pub mod web;
pub mod websocket;

pub use handlers::ApiResponse;
pub use web::{router, AppState, WebServer};
