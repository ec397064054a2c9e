//! Control API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::web::AppState;
use crate::audio::device::Device;
use crate::broadcast::room::{Listener, Room, RoomId};
use crate::capture::{AudioSource, CaptureSource};
use crate::error::{CaptureError, Error, RoomError};
use crate::protocol::{RoomNameRequest, SelectSourceRequest};
use crate::stats::StatsSummary;
use crate::streaming::{RoomStreamStatus, StreamConfig, StreamStatus};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn respond<T>(status: StatusCode, result: crate::error::Result<T>) -> ApiResult<T> {
    match result {
        Ok(data) => (status, Json(ApiResponse::ok(data))),
        Err(e) => {
            tracing::debug!("Request failed: {}", e);
            (status_for(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Room(RoomError::RoomNotFound(_)) => StatusCode::NOT_FOUND,
        Error::Room(_) => StatusCode::BAD_REQUEST,
        Error::Capture(CaptureError::DeviceNotFound(_)) => StatusCode::NOT_FOUND,
        Error::Capture(CaptureError::NoActiveSession) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Host platform and the fixed stream format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub platform: &'static str,
    pub stream: StreamConfig,
}

pub async fn get_platform<S: CaptureSource>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<PlatformInfo>> {
    let platform = state.controller.platform().await;
    let stream = state.controller.status().await.config;
    Json(ApiResponse::ok(PlatformInfo { platform, stream }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// List capture sources; `?refresh=true` re-enumerates
pub async fn list_devices<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Query(query): Query<DeviceQuery>,
) -> Json<ApiResponse<Vec<AudioSource>>> {
    let sources = if query.refresh {
        state.controller.refresh_sources().await
    } else {
        state.controller.sources().await
    };
    Json(ApiResponse::ok(sources))
}

pub async fn active_capture<S: CaptureSource>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<Option<Device>>> {
    Json(ApiResponse::ok(state.controller.active_source().await))
}

pub async fn start_capture<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<SelectSourceRequest>,
) -> ApiResult<Device> {
    respond(StatusCode::OK, state.controller.select_source(&req.device_id).await)
}

pub async fn stop_capture<S: CaptureSource>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<()>> {
    state.controller.stop_capture().await;
    Json(ApiResponse::ok(()))
}

pub async fn list_rooms<S: CaptureSource>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<Vec<Room>>> {
    Json(ApiResponse::ok(state.controller.hub().rooms()))
}

pub async fn create_room<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<RoomNameRequest>,
) -> ApiResult<Room> {
    let result = state.controller.hub().create_room(&req.name).map_err(Error::from);
    respond(StatusCode::CREATED, result)
}

pub async fn get_room<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
) -> ApiResult<Room> {
    let result = state
        .controller
        .hub()
        .room(id)
        .ok_or_else(|| RoomError::RoomNotFound(id.to_string()).into());
    respond(StatusCode::OK, result)
}

pub async fn room_listeners<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
) -> ApiResult<Vec<Listener>> {
    respond(StatusCode::OK, state.controller.hub().listeners(id).map_err(Error::from))
}

pub async fn rename_room<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
    Json(req): Json<RoomNameRequest>,
) -> ApiResult<Room> {
    let result = state.controller.hub().rename_room(id, &req.name).map_err(Error::from);
    respond(StatusCode::OK, result)
}

pub async fn close_room<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
) -> ApiResult<Room> {
    respond(StatusCode::OK, state.controller.close_room(id))
}

pub async fn start_stream<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
) -> ApiResult<Room> {
    respond(StatusCode::OK, state.controller.start_streaming(id).await)
}

pub async fn stop_stream<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
) -> ApiResult<Room> {
    respond(StatusCode::OK, state.controller.stop_streaming(id).await)
}

pub async fn room_stream_status<S: CaptureSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<RoomId>,
) -> ApiResult<RoomStreamStatus> {
    respond(StatusCode::OK, state.controller.room_status(id).await)
}

pub async fn streaming_status<S: CaptureSource>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<StreamStatus>> {
    Json(ApiResponse::ok(state.controller.status().await))
}

pub async fn get_stats<S: CaptureSource>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<StatsSummary>> {
    Json(ApiResponse::ok(state.controller.stats_summary()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::AudioFormat;
    use crate::broadcast::RoomHub;
    use crate::capture::service::testing::FakeCapture;
    use crate::capture::CaptureService;
    use crate::server::web::router;
    use crate::stats::StatsAccumulator;
    use crate::streaming::StreamingController;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let fake = FakeCapture::with_devices(vec![Device::input("mic", "Microphone", true)]);
        let controller = StreamingController::new(
            CaptureService::new(fake, AudioFormat::default()),
            Arc::new(RoomHub::default()),
            Arc::new(StatsAccumulator::new(AudioFormat::default().bitrate())),
            Duration::from_millis(100),
        );
        router(AppState {
            controller: Arc::new(controller),
        })
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let app = app();

        let (status, body) = call(&app, "POST", "/api/rooms", Some(json!({"name": " Lounge "}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["name"], "Lounge");
        let code = body["data"]["joinCode"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 6);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) =
            call(&app, "PATCH", &format!("/api/rooms/{}", id), Some(json!({"name": "Den"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Den");

        let (_, body) = call(&app, "GET", "/api/rooms", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = call(&app, "DELETE", &format!("/api/rooms/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "GET", &format!("/api/rooms/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_empty_room_name_rejected() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/rooms", Some(json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_streaming_requires_capture() {
        let app = app();
        let (_, body) = call(&app, "POST", "/api/rooms", Some(json!({"name": "Lounge"}))).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/rooms/{}/stream/start", id);
        let (status, body) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Capture error: No audio source selected");

        let (status, _) =
            call(&app, "POST", "/api/capture/start", Some(json!({"deviceId": "mic"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isStreaming"], true);

        let (_, body) = call(&app, "GET", "/api/streaming/status", None).await;
        assert_eq!(body["data"]["activeRooms"], 1);
        assert_eq!(body["data"]["config"]["codec"], "pcm");
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let app = app();
        let (status, body) =
            call(&app, "POST", "/api/capture/start", Some(json!({"deviceId": "nope"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (_, body) = call(&app, "GET", "/api/capture/active", None).await;
        assert_eq!(body["data"], Value::Null);
    }

    #[tokio::test]
    async fn test_devices_and_platform() {
        let app = app();
        let (_, body) = call(&app, "GET", "/api/devices?refresh=true", None).await;
        assert_eq!(body["data"][0]["id"], "mic");
        assert_eq!(body["data"][0]["isActive"], false);

        let (_, body) = call(&app, "GET", "/api/platform", None).await;
        assert_eq!(body["data"]["platform"], "test");
        assert_eq!(body["data"]["stream"]["frameBytes"], 19_200);
    }
}
