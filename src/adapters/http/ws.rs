use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::adapters::http::state::HttpState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<HttpState>) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// Forwards stream packets: the JSON message, then the JPEG it describes.
async fn handle_socket(mut socket: WebSocket, st: HttpState) {
    let mut rx = st.pipeline.subscribe();

    loop {
        let packet = tokio::select! {
            packet = rx.recv() => packet,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };
        let packet = match packet {
            Ok(packet) => packet,
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "viewer fell behind; dropping frames");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let json = match serde_json::to_string(&packet.message) {
            Ok(json) => json,
            Err(_) => continue,
        };
        if socket.send(Message::Text(json)).await.is_err() { break; }
        if let Some(jpeg) = packet.jpeg {
            if socket.send(Message::Binary(jpeg)).await.is_err() { break; }
        }
    }
}
