//! HTTP lifecycle API and result-stream endpoint of the orchestrator.
//!
//! ```text
//! POST /simulations                  create (201)
//! GET  /simulations                  list
//! GET  /simulations/{id}             get
//! POST /simulations/{id}/start       start
//! POST /simulations/{id}/pause       pause
//! POST /simulations/{id}/stop        stop
//! GET  /streams/simulations/{id}     WebSocket, one AggregatedTick per text frame
//! GET  /healthz
//! ```

use crate::frames;
use autofarm_core::{FarmError, SimulationRegistry, Subscription};
use autofarm_env::{FarmContext, SimulationConfig, SimulationDescriptor, SimulationId, WorkerConnector};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bound on one frame write to a result-stream client.
pub const STREAM_WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// A lifecycle error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub FarmError);

impl From<FarmError> for ApiError {
    fn from(err: FarmError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            FarmError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            FarmError::NotFound(_) => StatusCode::NOT_FOUND,
            FarmError::InvalidTransition { .. } => StatusCode::CONFLICT,
            FarmError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            FarmError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Builds the orchestrator router around a registry.
pub fn router<C: FarmContext, W: WorkerConnector>(registry: SimulationRegistry<C, W>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/simulations",
            post(create_simulation::<C, W>).get(list_simulations::<C, W>),
        )
        .route("/simulations/{id}", get(get_simulation::<C, W>))
        .route("/simulations/{id}/start", post(start_simulation::<C, W>))
        .route("/simulations/{id}/pause", post(pause_simulation::<C, W>))
        .route("/simulations/{id}/stop", post(stop_simulation::<C, W>))
        .route("/streams/simulations/{id}", get(stream_simulation::<C, W>))
        .with_state(registry)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn parse_id(raw: &str) -> Result<SimulationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(FarmError::not_found(raw)))
}

async fn create_simulation<C: FarmContext, W: WorkerConnector>(
    State(registry): State<SimulationRegistry<C, W>>,
    Json(config): Json<SimulationConfig>,
) -> Result<(StatusCode, Json<SimulationDescriptor>), ApiError> {
    let descriptor = registry.create(config)?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn list_simulations<C: FarmContext, W: WorkerConnector>(
    State(registry): State<SimulationRegistry<C, W>>,
) -> Json<Vec<SimulationDescriptor>> {
    Json(registry.list())
}

async fn get_simulation<C: FarmContext, W: WorkerConnector>(
    State(registry): State<SimulationRegistry<C, W>>,
    Path(id): Path<String>,
) -> Result<Json<SimulationDescriptor>, ApiError> {
    Ok(Json(registry.get(parse_id(&id)?)?))
}

async fn start_simulation<C: FarmContext, W: WorkerConnector>(
    State(registry): State<SimulationRegistry<C, W>>,
    Path(id): Path<String>,
) -> Result<Json<SimulationDescriptor>, ApiError> {
    Ok(Json(registry.start(parse_id(&id)?)?))
}

async fn pause_simulation<C: FarmContext, W: WorkerConnector>(
    State(registry): State<SimulationRegistry<C, W>>,
    Path(id): Path<String>,
) -> Result<Json<SimulationDescriptor>, ApiError> {
    Ok(Json(registry.pause(parse_id(&id)?)?))
}

async fn stop_simulation<C: FarmContext, W: WorkerConnector>(
    State(registry): State<SimulationRegistry<C, W>>,
    Path(id): Path<String>,
) -> Result<Json<SimulationDescriptor>, ApiError> {
    Ok(Json(registry.stop(parse_id(&id)?)?))
}

/// Subscribes before upgrading, so an unknown id is a plain 404.
async fn stream_simulation<C: FarmContext, W: WorkerConnector>(
    ws: WebSocketUpgrade,
    State(registry): State<SimulationRegistry<C, W>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let subscription = registry.subscribe(parse_id(&id)?)?;
    Ok(ws.on_upgrade(move |socket| relay_ticks(socket, subscription)))
}

async fn relay_ticks(socket: WebSocket, mut subscription: Subscription) {
    let id = subscription.simulation_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    debug!("stream {} opened (subscriber {})", id, subscription.id());

    loop {
        tokio::select! {
            tick = subscription.recv() => {
                let Some(tick) = tick else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let text = match frames::encode(tick.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("stream {}: {}", id, e);
                        continue;
                    }
                };
                match tokio::time::timeout(STREAM_WRITE_DEADLINE, ws_tx.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("stream {}: write failed: {}", id, e);
                        break;
                    }
                    Err(_) => {
                        warn!("stream {}: write deadline expired", id);
                        break;
                    }
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("stream {}: read failed: {}", id, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    info!(
        "stream {} closed (subscriber {}, {} dropped)",
        id,
        subscription.id(),
        subscription.dropped()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofarm_env::SimulationStatus;

    #[test]
    fn test_errors_map_to_status_codes() {
        let cases = [
            (FarmError::InvalidConfig("x".into()), StatusCode::BAD_REQUEST),
            (FarmError::not_found("x"), StatusCode::NOT_FOUND),
            (
                FarmError::InvalidTransition {
                    action: "pause",
                    status: SimulationStatus::Created,
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn test_unparseable_id_is_not_found() {
        let err = parse_id("farm-1").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
