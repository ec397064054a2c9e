//! Room channel over WebSocket
//!
//! One task per connection writes the connection's outbox to the socket
//! (events as JSON text, frames as binary); the upgrade task reads client
//! messages and applies them to the hub.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;

use super::web::AppState;
use crate::broadcast::{ConnectionId, Outbound, Outbox, RoomHub};
use crate::capture::CaptureSource;
use crate::error::NetworkError;
use crate::protocol::{ClientMessage, ServerEvent};

pub async fn ws_handler<S: CaptureSource>(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState<S>>,
) -> Response {
    let address = connect_info.map(|ConnectInfo(addr)| addr);
    let hub = state.controller.hub().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, address, hub))
}

async fn handle_socket(socket: WebSocket, address: Option<SocketAddr>, hub: Arc<RoomHub>) {
    let (connection, outbox) = hub.connect(address);
    tracing::info!(
        "Room channel connected: {} ({})",
        connection,
        address.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string())
    );

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_outbox(sender, outbox.clone()));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(&hub, connection, &outbox, &text),
                    Some(Ok(Message::Binary(_))) => {
                        let error = NetworkError::ProtocolViolation(
                            "binary messages are not accepted".to_string(),
                        );
                        outbox.push_event(ServerEvent::Error {
                            message: error.to_string(),
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Room channel read error on {}: {}", connection, e);
                        break;
                    }
                }
            }
            // Writer ends when the outbox closes or the socket fails
            _ = &mut writer => break,
        }
    }

    hub.disconnect(connection);
    outbox.close();
    if !writer.is_finished() {
        writer.abort();
    }
    tracing::info!("Room channel disconnected: {}", connection);
}

fn handle_text(hub: &RoomHub, connection: ConnectionId, outbox: &Outbox, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Bad client message on {}: {}", connection, e);
            outbox.push_event(ServerEvent::Error {
                message: format!("Invalid message: {}", e),
            });
            return;
        }
    };

    match message {
        ClientMessage::JoinRoom {
            join_code,
            display_name,
        } => {
            // Failures are reported on the channel by the hub
            if let Err(e) = hub.join(connection, &join_code, &display_name) {
                tracing::debug!("Join from {} rejected: {}", connection, e);
            }
        }
        ClientMessage::LeaveRoom => {
            hub.leave(connection);
        }
    }
}

async fn write_outbox(mut sender: SplitSink<WebSocket, Message>, outbox: Arc<Outbox>) {
    while let Some(item) = outbox.next().await {
        let message = match item {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    tracing::error!("Failed to encode event: {}", e);
                    continue;
                }
            },
            Outbound::Frame(frame) => Message::Binary(frame.as_bytes().to_vec()),
        };
        if sender.send(message).await.is_err() {
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::Device;
    use crate::audio::format::AudioFormat;
    use crate::capture::service::testing::FakeCapture;
    use crate::capture::CaptureService;
    use crate::network::listener::bind_tcp;
    use crate::server::web::WebServer;
    use crate::stats::StatsAccumulator;
    use crate::streaming::StreamingController;
    use crate::config::ServerConfig;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn next_event<St>(ws: &mut St) -> ServerEvent
    where
        St: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_join_over_websocket() {
        let fake = FakeCapture::with_devices(vec![Device::input("mic", "Microphone", true)]);
        let controller = Arc::new(StreamingController::new(
            CaptureService::new(fake, AudioFormat::default()),
            Arc::new(RoomHub::default()),
            Arc::new(StatsAccumulator::new(AudioFormat::default().bitrate())),
            Duration::from_millis(100),
        ));
        let room = controller.hub().create_room("Lounge").unwrap();

        let listener = bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = WebServer::new(ServerConfig::default(), controller.clone());
        tokio::spawn(server.serve(listener, std::future::pending()));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
        assert!(matches!(next_event(&mut ws).await, ServerEvent::Error { .. }));

        let join = ClientMessage::JoinRoom {
            join_code: room.join_code.clone(),
            display_name: "Ana".to_string(),
        };
        ws.send(WsMessage::Text(serde_json::to_string(&join).unwrap()))
            .await
            .unwrap();

        match next_event(&mut ws).await {
            ServerEvent::JoinRoomResult { ok, room: Some(joined), is_streaming, .. } => {
                assert!(ok);
                assert_eq!(joined.id, room.id);
                assert_eq!(is_streaming, Some(false));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let members = controller.hub().listeners(room.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].display_name, "Ana");
        assert!(members[0].address.is_some());

        ws.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(controller.hub().listeners(room.id).unwrap().is_empty());
    }
}
