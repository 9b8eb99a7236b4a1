//! WebSocket client side of the orchestrator result stream.

use crate::frames;
use async_trait::async_trait;
use autofarm_env::{AggregatedTick, EnvError, SimulationId, TickSource, TickStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as TMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens `{base}/streams/simulations/{id}` on the orchestrator.
#[derive(Debug, Clone)]
pub struct WsTickSource {
    base: String,
}

impl WsTickSource {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, simulation_id: SimulationId) -> String {
        format!("{}/streams/simulations/{}", self.base, simulation_id)
    }
}

#[async_trait]
impl TickSource for WsTickSource {
    async fn open(&self, simulation_id: SimulationId) -> Result<Box<dyn TickStream>, EnvError> {
        let url = self.stream_url(simulation_id);
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                debug!("result stream for {} opened", simulation_id);
                Ok(Box::new(WsTickStream { socket }))
            }
            Err(WsError::Http(response)) if response.status() == StatusCode::NOT_FOUND => {
                Err(EnvError::not_found(simulation_id))
            }
            Err(e) => Err(EnvError::network(format!("{}: {}", url, e))),
        }
    }
}

struct WsTickStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TickStream for WsTickStream {
    // `StreamExt::next` holds no state across polls, so dropping it loses nothing.
    async fn next_tick(&mut self) -> Result<Option<Arc<AggregatedTick>>, EnvError> {
        loop {
            match self.socket.next().await {
                Some(Ok(TMessage::Text(text))) => {
                    let tick: AggregatedTick = frames::decode(text.as_str())?;
                    return Ok(Some(Arc::new(tick)));
                }
                Some(Ok(TMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(EnvError::network(e.to_string())),
            }
        }
    }
}
