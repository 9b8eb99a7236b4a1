//! WebSocket client side of the worker exchange.

use crate::frames;
use async_trait::async_trait;
use autofarm_env::{EnvError, StepRequest, StepResponse, WorkerConnector, WorkerExchange};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `{base}/worker` once per tick loop.
#[derive(Debug, Clone)]
pub struct WsWorkerConnector {
    url: String,
}

impl WsWorkerConnector {
    /// `base` is a `ws://host:port` address with or without the `/worker` path.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let url = if base.ends_with("/worker") {
            base
        } else {
            format!("{}/worker", base.trim_end_matches('/'))
        };
        Self { url }
    }
}

#[async_trait]
impl WorkerConnector for WsWorkerConnector {
    async fn connect(&self) -> Result<Box<dyn WorkerExchange>, EnvError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| EnvError::network(format!("{}: {}", self.url, e)))?;
        Ok(Box::new(WsExchange { socket }))
    }

    fn address(&self) -> String {
        self.url.clone()
    }
}

struct WsExchange {
    socket: Socket,
}

#[async_trait]
impl WorkerExchange for WsExchange {
    async fn send(&mut self, request: StepRequest) -> Result<(), EnvError> {
        let text = frames::encode(&request)?;
        self.socket
            .send(TMessage::Text(text.into()))
            .await
            .map_err(|e| EnvError::network(e.to_string()))
    }

    async fn recv(&mut self) -> Result<StepResponse, EnvError> {
        loop {
            match self.socket.next().await {
                Some(Ok(TMessage::Text(text))) => return frames::decode(text.as_str()),
                Some(Ok(TMessage::Close(_))) | None => {
                    return Err(EnvError::closed("worker closed the exchange"))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(EnvError::network(e.to_string())),
            }
        }
    }
}
