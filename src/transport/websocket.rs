//! Socket.IO WebSocket connection and frame handling

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::frame::{self, Packet};
use super::TransportError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct EngineSocket {
    stream: WsStream,
    handshake: frame::Handshake,
}

impl EngineSocket {
    /// Connect and complete the engine.io open + socket.io connect exchange.
    pub async fn connect(server_url: &str) -> Result<Self, TransportError> {
        let ws_url = socket_url(server_url)?;

        tracing::info!("Connecting WebSocket to {}", ws_url);

        let (stream, response) =
            connect_async(ws_url.as_str())
                .await
                .map_err(|source| TransportError::Connect {
                    url: ws_url.to_string(),
                    source,
                })?;

        tracing::info!("WebSocket connected (status={})", response.status());

        let mut socket = Self {
            stream,
            handshake: frame::Handshake::default(),
        };

        let open = socket.recv_frame().await?.ok_or(TransportError::Closed)?;
        match frame::decode(&open) {
            Ok(Packet::Open(handshake)) => {
                tracing::debug!(
                    "Engine.IO open: sid={} ping={}ms/{}ms",
                    handshake.sid,
                    handshake.ping_interval,
                    handshake.ping_timeout
                );
                socket.handshake = handshake;
            }
            _ => {
                return Err(TransportError::Handshake(format!(
                    "expected open packet, got {}",
                    open
                )))
            }
        }

        socket.send_text(frame::CONNECT).await?;

        loop {
            let text = socket.recv_frame().await?.ok_or(TransportError::Closed)?;
            match frame::decode(&text) {
                Ok(Packet::Connect(_)) => break,
                Ok(Packet::ConnectError(reason)) => {
                    return Err(TransportError::Handshake(format!(
                        "connect refused: {}",
                        reason
                    )))
                }
                Ok(Packet::Ping) => socket.send_text(frame::PONG).await?,
                Ok(other) => tracing::debug!("Ignoring packet before connect ack: {:?}", other),
                Err(e) => tracing::warn!("Undecodable frame during handshake: {}", e),
            }
        }

        tracing::info!("Socket.IO session established");
        Ok(socket)
    }

    /// Emit a socket.io event with one argument.
    pub async fn emit(&mut self, event: &str, payload: &Value) -> Result<(), TransportError> {
        let text = frame::encode_event(event, payload).map_err(TransportError::Encode)?;
        self.send_text(&text).await
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<(), TransportError> {
        tracing::debug!("WS send: {}", msg);
        self.stream.send(Message::Text(msg.to_string())).await?;
        Ok(())
    }

    /// Receive the next text frame, answering WebSocket pings.
    ///
    /// Returns `Ok(None)` when the peer closed the connection.
    pub async fn recv_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    /// Leave the namespace and close the WebSocket. Errors are only logged.
    pub async fn close(&mut self) {
        if let Err(e) = self.send_text(frame::DISCONNECT).await {
            tracing::debug!("Failed to send socket.io disconnect: {}", e);
        }
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }

    /// How long the link may stay silent before it is considered dead.
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake.ping_interval + self.handshake.ping_timeout)
    }
}

/// Map the configured http(s) base to the socket.io websocket endpoint.
pub fn socket_url(server_url: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(server_url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", server_url, e)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {} in {}",
                other, server_url
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(server_url.to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));

    Ok(url)
}
