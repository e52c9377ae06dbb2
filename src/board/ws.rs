use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::models::{PositionContext, Task, TaskPosition};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        organization_id: i64,
        task_id: i64,
    },
    /// The complete group after a move. Dashboards showing the same group
    /// overwrite their local positions with these.
    PositionsUpdated {
        organization_id: i64,
        context: PositionContext,
        context_id: Option<i64>,
        positions: Vec<TaskPosition>,
    },
}

impl WsMessage {
    /// The tenant whose dashboards may see this message.
    pub fn organization_id(&self) -> i64 {
        match self {
            Self::TaskCreated { task } | Self::TaskUpdated { task } => task.organization_id,
            Self::TaskDeleted {
                organization_id, ..
            }
            | Self::PositionsUpdated {
                organization_id, ..
            } => *organization_id,
        }
    }
}

/// A serialized message on the broadcast channel, tagged with its tenant.
#[derive(Debug, Clone)]
pub struct WsEvent {
    pub organization_id: i64,
    pub payload: String,
}

// ── WebSocket handler ────────────────────────────────────────────────

/// WebSocket handler that subscribes to the given broadcast sender. Only
/// events of `organization_id` reach the socket.
pub async fn ws_handler_with_sender(
    ws: WebSocketUpgrade,
    organization_id: i64,
    tx: broadcast::Sender<WsEvent>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, organization_id, tx))
}

async fn handle_socket(socket: WebSocket, organization_id: i64, tx: broadcast::Sender<WsEvent>) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    tracing::debug!(organization_id, "websocket subscribed");
    run_socket_loop(sender, receiver, rx, organization_id).await;
}

/// Wait for the next event addressed to `organization_id`, skipping the rest.
async fn next_for_organization(
    rx: &mut broadcast::Receiver<WsEvent>,
    organization_id: i64,
) -> Result<String, broadcast::error::RecvError> {
    loop {
        let event = rx.recv().await?;
        if event.organization_id == organization_id {
            return Ok(event.payload);
        }
    }
}

/// Forward broadcasts to one client and keep the connection alive.
///
/// If no Pong arrives within [`PONG_TIMEOUT`] after a Ping, the connection is
/// considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<WsEvent>,
    organization_id: i64,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick fires immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("websocket pong timeout, closing");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = next_for_organization(&mut rx, organization_id) => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The client resyncs from the query endpoint on its next load.
                        tracing::warn!(skipped, "websocket subscriber lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to the tenant's connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<WsEvent>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(WsEvent {
                organization_id: msg.organization_id(),
                payload,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WsMessage");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
