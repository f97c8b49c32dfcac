use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.hub.subscribe();

    debug!(subscribers = state.hub.subscriber_count(), "status subscriber connected");

    let send_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    let text = match serde_json::to_string(&update) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "failed to serialize status update");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound frames are drained and ignored; the stream ending means the
    // client went away.
    while let Some(Ok(_)) = receiver.next().await {}

    send_task.abort();
    debug!("status subscriber disconnected");
}
