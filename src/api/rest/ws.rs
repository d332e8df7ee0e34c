use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use dashmap::DashSet;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::tracking::{LocationUpdate, TrackingCommand};
use crate::state::AppState;

pub async fn tracking_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.tracking_tx.subscribe();
    let rooms: Arc<DashSet<Uuid>> = Arc::new(DashSet::new());

    info!("tracking client connected");

    let send_rooms = rooms.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let update = match rx.recv().await {
                Ok(update) => update,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tracking client lagging; updates dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if !send_rooms.contains(&update.delivery_id) {
                continue;
            }

            let json = match serde_json::to_string(&update) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize location update");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let tx = state.tracking_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => apply_command(&text, &rooms, &tx),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("tracking client disconnected");
}

/// Applies one inbound frame. Malformed frames are ignored.
fn apply_command(text: &str, rooms: &DashSet<Uuid>, tx: &broadcast::Sender<LocationUpdate>) {
    let command = match serde_json::from_str::<TrackingCommand>(text) {
        Ok(command) => command,
        Err(err) => {
            debug!(error = %err, "ignoring malformed tracking frame");
            return;
        }
    };

    match command {
        TrackingCommand::Join { delivery_id } => {
            rooms.insert(delivery_id);
        }
        TrackingCommand::Leave { delivery_id } => {
            rooms.remove(&delivery_id);
        }
        TrackingCommand::Location {
            delivery_id,
            location,
        } => {
            // No subscribers is not an error.
            let _ = tx.send(LocationUpdate {
                delivery_id,
                location,
            });
        }
    }
}
