use crate::{handlers::AppState, models::MarketSnapshot};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_snapshot(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    snapshot: &MarketSnapshot,
) -> bool {
    match serde_json::to_string(snapshot) {
        Ok(msg) => sender.send(Message::Text(msg)).await.is_ok(),
        Err(e) => {
            tracing::warn!("Failed to encode snapshot: {}", e);
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.dashboard.subscribe();
    tracing::debug!("Dashboard viewer connected ({} watching)", state.dashboard.viewer_count());

    // A new viewer sees the current state straight away.
    let current = match state.dashboard.latest().await {
        Some(snapshot) => Some(snapshot),
        None => state.dashboard.refresh().await,
    };
    if let Some(snapshot) = current {
        if !send_snapshot(&mut sender, &snapshot).await {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(snapshot) => {
                        if !send_snapshot(&mut sender, &snapshot).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dashboard viewer lagged, {} update(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}
