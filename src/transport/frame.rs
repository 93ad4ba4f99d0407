//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Framing on the wire (one WebSocket text message per packet):
//!   0{json}           - engine.io open (handshake parameters)
//!   1                 - engine.io close
//!   2 / 3             - engine.io ping / pong
//!   6                 - engine.io noop
//!   40[{json}]        - socket.io connect (ack from server carries the sid)
//!   41                - socket.io disconnect
//!   42[ack]["ev",..]  - socket.io event, optional `/nsp,` prefix and ack id
//!   44{json}          - socket.io connect error

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Client request to join the default namespace.
pub const CONNECT: &str = "40";
/// Client request to leave the default namespace.
pub const DISCONNECT: &str = "41";
/// Engine.IO pong, sent in reply to a server ping.
pub const PONG: &str = "3";

/// Parameters from the engine.io open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            sid: String::new(),
            upgrades: Vec::new(),
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            max_payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        /// First event argument, `Null` when the event has none.
        payload: Value,
        ack: Option<u64>,
    },
    ConnectError(Value),
    /// Acks, binary packets, upgrades: nothing this client acts on.
    Other(String),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("malformed packet JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event packet has no event name")]
    MissingName,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Packet, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socketio(rest),
        '5' => Ok(Packet::Other(text.to_string())),
        '6' => Ok(Packet::Noop),
        other => Err(FrameError::UnknownType(other)),
    }
}

fn decode_socketio(text: &str) -> Result<Packet, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = strip_namespace(chars.as_str());

    match kind {
        '0' => {
            if rest.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(serde_json::from_str(rest)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            let ack = rest[..digits].parse().ok();
            let args: Vec<Value> = serde_json::from_str(&rest[digits..])?;
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => return Err(FrameError::MissingName),
            };
            let payload = args.next().unwrap_or(Value::Null);
            Ok(Packet::Event { name, payload, ack })
        }
        '4' => Ok(Packet::ConnectError(
            serde_json::from_str(rest).unwrap_or_else(|_| Value::String(rest.to_string())),
        )),
        '3' | '5' | '6' => Ok(Packet::Other(format!("4{}", text))),
        other => Err(FrameError::UnknownType(other)),
    }
}

/// Drop a `/namespace,` prefix, if any.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        rest.find(',').map_or("", |pos| &rest[pos + 1..])
    } else {
        rest
    }
}

/// Encode a socket.io event with a single argument.
pub fn encode_event(name: &str, payload: &Value) -> Result<String, serde_json::Error> {
    let args = serde_json::to_string(&serde_json::json!([name, payload]))?;
    Ok(format!("42{}", args))
}
