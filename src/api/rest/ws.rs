use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::registry::BookingRegistry;
use crate::state::AppState;

pub async fn ws_handler<R: BookingRegistry>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<R>>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<R: BookingRegistry>(socket: WebSocket, state: Arc<AppState<R>>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.session.subscribe_events());

    info!("shell event stream connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                // Slow consumer skipped some events; keep streaming.
                Err(_lagged) => continue,
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize session event");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("shell event stream disconnected");
}
