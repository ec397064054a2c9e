//! Host web server: control API plus the room channel

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{handlers, websocket};
use crate::capture::CaptureSource;
use crate::config::ServerConfig;
use crate::error::{NetworkError, Result};
use crate::network::listener::{bind_tcp, resolve_bind_addr};
use crate::streaming::StreamingController;

/// State shared by every handler
pub struct AppState<S: CaptureSource> {
    pub controller: Arc<StreamingController<S>>,
}

impl<S: CaptureSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

/// Build the router for `state`
pub fn router<S: CaptureSource>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/platform", get(handlers::get_platform::<S>))
        .route("/api/devices", get(handlers::list_devices::<S>))
        .route("/api/capture/active", get(handlers::active_capture::<S>))
        .route("/api/capture/start", post(handlers::start_capture::<S>))
        .route("/api/capture/stop", post(handlers::stop_capture::<S>))
        .route(
            "/api/rooms",
            get(handlers::list_rooms::<S>).post(handlers::create_room::<S>),
        )
        .route(
            "/api/rooms/:id",
            get(handlers::get_room::<S>)
                .patch(handlers::rename_room::<S>)
                .delete(handlers::close_room::<S>),
        )
        .route("/api/rooms/:id/listeners", get(handlers::room_listeners::<S>))
        .route("/api/rooms/:id/stream", get(handlers::room_stream_status::<S>))
        .route("/api/rooms/:id/stream/start", post(handlers::start_stream::<S>))
        .route("/api/rooms/:id/stream/stop", post(handlers::stop_stream::<S>))
        .route("/api/streaming/status", get(handlers::streaming_status::<S>))
        .route("/api/stats", get(handlers::get_stats::<S>))
        .route("/ws", get(websocket::ws_handler::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP/WebSocket server of the host
pub struct WebServer<S: CaptureSource> {
    config: ServerConfig,
    state: AppState<S>,
}

impl<S: CaptureSource> WebServer<S> {
    pub fn new(config: ServerConfig, controller: Arc<StreamingController<S>>) -> Self {
        Self {
            config,
            state: AppState { controller },
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(resolve_bind_addr(&self.config.bind_address, self.config.http_port)?)
    }

    /// Serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.bind_addr()?;
        let listener = bind_tcp(addr)?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("Control API and room channel listening on http://{}", addr);

        let app = router(self.state);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Web server stopped");
        Ok(())
    }
}
