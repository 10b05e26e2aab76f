//! WebSocket endpoint: upgrade, pumps and inbound frame routing.
//!
//! Two inbound frame generations are accepted: the original
//! `{action: "scan"|"ping", data}` form driving the in-process TCP
//! sweep, and the envelope form `{type, request: {scanner_service,
//! options}}` dispatched through the broker. Outbound frames are JSON
//! with a `type` discriminator. A pong (or any inbound traffic) resets
//! the 60 s read deadline; pings go out at nine tenths of it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::AppState;
use crate::models::ScanEnvelope;
use crate::scan::tcp::TcpSweep;

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54); // (PONG_WAIT * 9) / 10

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub task_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.task_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, task_id: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_id, mut out_rx) = state.hub.register().await;

    // Late joiners announced with a task id get the recorded history for
    // it; everyone else gets a plain welcome.
    match &task_id {
        Some(task_id) => {
            state.hub.subscribe(client_id, task_id).await;
            let responses = state
                .history
                .find_by_task(task_id)
                .await
                .unwrap_or_else(|e| {
                    warn!("history lookup for task {task_id} failed: {e}");
                    Vec::new()
                });
            state
                .hub
                .send_to(
                    client_id,
                    json!({
                        "type": "initial_status",
                        "task_id": task_id,
                        "scan": Value::Null,
                        "responses": responses,
                        "timestamp": Utc::now(),
                    }),
                )
                .await;
        }
        None => {
            state
                .hub
                .send_to(
                    client_id,
                    json!({
                        "type": "welcome",
                        "data": {"message": "Connected to scanhive"},
                    }),
                )
                .await;
        }
    }

    // Write pump: drains the outbound buffer, keeps the connection live
    // with pings, enforces the write deadline.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_PERIOD);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    let Some(frame) = frame else {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    };
                    let sent = tokio::time::timeout(
                        WRITE_WAIT,
                        ws_tx.send(Message::Text(frame.to_string().into())),
                    )
                    .await;
                    if !matches!(sent, Ok(Ok(()))) {
                        break;
                    }
                }
                _ = ping.tick() => {
                    let sent = tokio::time::timeout(
                        WRITE_WAIT,
                        ws_tx.send(Message::Ping(Vec::new().into())),
                    )
                    .await;
                    if !matches!(sent, Ok(Ok(()))) {
                        break;
                    }
                }
            }
        }
    });

    // Read pump: the timeout doubles as the pong deadline.
    loop {
        match tokio::time::timeout(PONG_WAIT, ws_rx.next()).await {
            Err(_) => {
                info!("client {client_id} missed its pong deadline");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_text(&state, client_id, text.as_str()).await;
            }
            Ok(Some(Ok(Message::Pong(_)))) => {
                debug!("pong from client {client_id}");
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {}
        }
    }

    state.hub.unregister(client_id).await;
    writer.abort();
    info!("client {client_id} disconnected");
}

async fn handle_text(state: &Arc<AppState>, client_id: u64, text: &str) {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            send_error(state, client_id, "Invalid message format").await;
            return;
        }
    };

    if let Some(action) = msg.get("action").and_then(Value::as_str) {
        match action {
            "ping" => {
                state
                    .hub
                    .send_to(client_id, json!({"type": "pong", "data": Value::Null}))
                    .await;
            }
            "scan" => {
                handle_sweep_action(state, client_id, msg.get("data").cloned()).await;
            }
            other => {
                send_error(state, client_id, &format!("Unknown action: {other}")).await;
            }
        }
        return;
    }

    if let Some(request) = msg.get("request") {
        handle_envelope_frame(state, client_id, request.clone()).await;
        return;
    }

    send_error(state, client_id, "Invalid message format").await;
}

/// Legacy direct sweep: `{action:"scan", data:{ip, ports}}` runs the TCP
/// connect sweep in-process and streams the result to the task's
/// subscribers.
async fn handle_sweep_action(state: &Arc<AppState>, client_id: u64, data: Option<Value>) {
    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct SweepData {
        ip: String,
        ports: String,
    }

    let data: SweepData = match data.map(serde_json::from_value).transpose() {
        Ok(d) => d.unwrap_or_default(),
        Err(_) => {
            send_error(state, client_id, "Invalid scan request").await;
            return;
        }
    };
    if data.ip.is_empty() {
        send_error(state, client_id, "IP address is required").await;
        return;
    }
    let ports = if data.ports.is_empty() {
        "1-1024".to_string()
    } else {
        data.ports
    };

    let task_id = format!(
        "task_{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    state.hub.subscribe(client_id, &task_id).await;
    state
        .hub
        .send_to(client_id, json!({"type": "scan_queued", "data": {"task_id": task_id}}))
        .await;

    let hub = state.hub.clone();
    let sweep = TcpSweep::new(&state.sweep);
    tokio::spawn(async move {
        let frame = match sweep.scan(&data.ip, &ports).await {
            Ok(open_ports) => json!({
                "type": "scan_result",
                "data": {
                    "task_id": task_id,
                    "open_ports": open_ports,
                    "status": "completed",
                }
            }),
            Err(e) => json!({
                "type": "scan_result",
                "data": {
                    "task_id": task_id,
                    "open_ports": [],
                    "status": "failed",
                    "error": e.to_string(),
                }
            }),
        };
        hub.broadcast_to_task(&task_id, frame).await;
    });
}

/// Envelope path: the request goes through the router and out over the
/// broker; the reply comes back to this client and to any task
/// subscribers.
async fn handle_envelope_frame(state: &Arc<AppState>, client_id: u64, request: Value) {
    let envelope: ScanEnvelope = match serde_json::from_value(request) {
        Ok(env) => env,
        Err(e) => {
            send_error(state, client_id, &format!("Invalid request: {e}")).await;
            return;
        }
    };

    let state = state.clone();
    tokio::spawn(async move {
        match state.router.handle_envelope(&envelope).await {
            Ok(reply) => {
                let task_id = reply.task_id().to_string();
                let frame = json!({"type": "response", "response": reply});
                state.hub.send_to(client_id, frame.clone()).await;
                state.hub.broadcast_to_task(&task_id, frame).await;
            }
            Err(e) => {
                send_error(&state, client_id, &e.to_string()).await;
            }
        }
    });
}

async fn send_error(state: &Arc<AppState>, client_id: u64, message: &str) {
    debug!("error to client {client_id}: {message}");
    state
        .hub
        .send_to(client_id, json!({"type": "error", "data": {"message": message}}))
        .await;
}
