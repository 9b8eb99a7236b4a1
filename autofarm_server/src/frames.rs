//! JSON framing shared by every WebSocket endpoint.

use autofarm_core::ObserverFrame;
use autofarm_env::EnvError;
use axum::extract::ws::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a wire value as one JSON text frame payload.
pub fn encode<T: Serialize>(value: &T) -> Result<String, EnvError> {
    serde_json::to_string(value).map_err(EnvError::serialization)
}

/// Decodes one JSON text frame payload.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, EnvError> {
    serde_json::from_str(text).map_err(EnvError::serialization)
}

/// Server-side frame into the bridge's transport-neutral view.
pub fn observer_frame(message: Message) -> ObserverFrame {
    match message {
        Message::Text(text) => ObserverFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => ObserverFrame::Binary(data.to_vec()),
        Message::Ping(_) => ObserverFrame::Ping,
        Message::Pong(_) => ObserverFrame::Pong,
        Message::Close(_) => ObserverFrame::Close,
    }
}

/// Bridge frame back onto the server socket.
pub fn ws_message(frame: ObserverFrame) -> Message {
    match frame {
        ObserverFrame::Text(text) => Message::Text(text.into()),
        ObserverFrame::Binary(data) => Message::Binary(data.into()),
        ObserverFrame::Ping => Message::Ping(Default::default()),
        ObserverFrame::Pong => Message::Pong(Default::default()),
        ObserverFrame::Close => Message::Close(None),
    }
}
