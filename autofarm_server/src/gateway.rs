//! Observer gateway: relays one simulation's ticks to each WebSocket client.

use crate::frames::{observer_frame, ws_message};
use autofarm_core::{BridgeExit, ObserverFrame, ProtocolBridge};
use autofarm_env::{SimulationId, TickSource};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Shared state of every gateway connection.
pub struct GatewayState<S: TickSource> {
    pub source: Arc<S>,
    pub bridge: ProtocolBridge,

    /// Flips to `true` when the process is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl<S: TickSource> Clone for GatewayState<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            bridge: self.bridge.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

pub fn router<S: TickSource>(state: GatewayState<S>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/ws/simulations/{id}", get(observer_socket::<S>))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn observer_socket<S: TickSource>(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState<S>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(simulation_id) = id.parse::<SimulationId>() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Simulation not found: {}", id) })),
        )
            .into_response();
    };
    ws.on_upgrade(move |socket| serve_observer(socket, simulation_id, state))
}

async fn serve_observer<S: TickSource>(
    socket: WebSocket,
    simulation_id: SimulationId,
    state: GatewayState<S>,
) {
    let (ws_tx, ws_rx) = socket.split();
    let sink = ws_tx.with(|frame: ObserverFrame| {
        future::ready(Ok::<Message, axum::Error>(ws_message(frame)))
    });
    let stream = ws_rx.map(|incoming| incoming.map(observer_frame));

    let mut shutdown = state.shutdown.clone();
    let cancelled = async move {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
    };

    info!("observer attached to simulation {}", simulation_id);
    let exit = state
        .bridge
        .run(simulation_id, state.source.as_ref(), sink, stream, cancelled)
        .await;
    match exit {
        BridgeExit::PeerClosed | BridgeExit::Cancelled => {
            debug!("observer of {} detached: {}", simulation_id, exit)
        }
        _ => info!("observer of {} detached: {}", simulation_id, exit),
    }
}
