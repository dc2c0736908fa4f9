use crate::models::OutboundEvent;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;

/// Event socket: popup, page relay and confirmation window all subscribe
/// here for payment status, badge and open-surface instructions.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(events): State<broadcast::Sender<OutboundEvent>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, events: broadcast::Sender<OutboundEvent>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = events.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            Some(Ok(msg)) = receiver.next() => {
                match msg {
                    Message::Close(_) => break,
                    Message::Ping(data) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("event socket closed");
}
