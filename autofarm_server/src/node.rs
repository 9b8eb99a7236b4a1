//! Worker node: one WebSocket connection per step exchange.

use crate::frames;
use autofarm_core::WorkerNode;
use autofarm_env::StepRequest;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the node router. Entity state lives in `node` and outlives
/// every connection.
pub fn router(node: Arc<WorkerNode>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/worker", get(worker_socket))
        .with_state(node)
}

async fn health(State(node): State<Arc<WorkerNode>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "simulations": node.simulation_count(),
    }))
}

async fn worker_socket(ws: WebSocketUpgrade, State(node): State<Arc<WorkerNode>>) -> Response {
    ws.on_upgrade(move |socket| serve_exchange(socket, node))
}

/// Answers step requests in arrival order until the peer goes away.
async fn serve_exchange(socket: WebSocket, node: Arc<WorkerNode>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut steps = 0u64;

    while let Some(incoming) = ws_rx.next().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("exchange read failed: {}", e);
                break;
            }
        };

        let request: StepRequest = match frames::decode(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                warn!("closing exchange on malformed step request: {}", e);
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        };

        let response = node.step(&request);
        let reply = match frames::encode(&response) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("simulation {}: {}", request.simulation_id, e);
                break;
            }
        };
        if ws_tx.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
        steps += 1;
    }

    debug!("exchange closed after {} steps", steps);
}
