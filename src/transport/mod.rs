//! Realtime chat transport over Socket.IO.
//!
//! One `TransportClient` holds at most one live room session. The session
//! runs in a background task that owns the WebSocket; the client talks to it
//! through channels:
//!
//! ```text
//! TransportClient ── outbound frames (mpsc) ──> session task ──> socket
//!                 <── TransportEvent (bounded mpsc) ──
//!                 ── shutdown (oneshot) ──>
//!                 <── ConnectionState (watch) ──
//! ```
//!
//! When the socket drops, the task reconnects with exponential backoff,
//! re-joins the room and reports `TransportEvent::Reconnected` so the owner
//! can replay history it may have missed.

pub mod frame;
pub mod websocket;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::models::Message;
use frame::Packet;
use websocket::EngineSocket;

/// Emitted once per connect with the room id.
pub const JOIN_ROOM: &str = "join_room";
/// Server-pushed chat message.
pub const RECEIVE_MESSAGE: &str = "receive_message";
/// Client-pushed chat message.
pub const SEND_MESSAGE: &str = "send_message";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("WebSocket connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed by server")]
    Closed,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("already joined room {joined}, cannot join {requested}")]
    RoomMismatch { joined: String, requested: String },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected to a room")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session task has stopped")]
    Closed,
}

/// Events delivered to the owner of the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A `receive_message` payload decoded into a message.
    Message(Message),
    /// An inbound frame or payload that could not be used; it was skipped.
    Malformed { frame: String, reason: String },
    /// The link dropped and was restored after `attempts` tries.
    Reconnected { attempts: u32 },
    /// The link dropped and reconnecting gave up.
    Disconnected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected { room_id: String },
    Reconnecting { room_id: String, attempt: u32 },
}

/// Exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(64),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (1-based) attempt: 1x, 2x, 4x, ... capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub server_url: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the inbound event channel.
    pub event_buffer: usize,
}

impl TransportConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            event_buffer: 256,
        }
    }
}

pub struct TransportClient {
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    session: Option<SessionHandle>,
}

struct SessionHandle {
    room_id: String,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Option<oneshot::Sender<()>>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

impl TransportClient {
    /// Create a disconnected client and the receiving end of its events.
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let client = Self {
            config,
            events,
            session: None,
        };
        (client, events_rx)
    }

    /// Connect and join `room_id`.
    ///
    /// A no-op when a session for the same room is already live.
    pub async fn connect(&mut self, room_id: &str) -> Result<(), TransportError> {
        if let Some(session) = &self.session {
            if session.is_live() {
                if session.room_id == room_id {
                    tracing::info!("Already connected to room {}", room_id);
                    return Ok(());
                }
                return Err(TransportError::RoomMismatch {
                    joined: session.room_id.clone(),
                    requested: room_id.to_string(),
                });
            }
            self.session = None;
        }

        let timeout = self.config.connect_timeout;
        let socket = time::timeout(timeout, open_room(&self.config.server_url, room_id))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .inspect_err(|e| tracing::warn!("Connect to room {} failed: {}", room_id, e))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected {
            room_id: room_id.to_string(),
        });

        let task = RoomTask {
            server_url: self.config.server_url.clone(),
            room_id: room_id.to_string(),
            policy: self.config.reconnect,
            connect_timeout: timeout,
            socket,
            events: self.events.clone(),
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            state: state_tx,
        };

        self.session = Some(SessionHandle {
            room_id: room_id.to_string(),
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            state: state_rx,
            task: tokio::spawn(task.run()),
        });

        tracing::info!("Joined room {}", room_id);
        Ok(())
    }

    /// Tear down the session. Safe to call at any time, any number of times.
    pub fn disconnect(&mut self) {
        match self.session.take() {
            Some(mut session) => {
                tracing::info!("Leaving room {}", session.room_id);
                if let Some(tx) = session.shutdown.take() {
                    let _ = tx.send(());
                }
            }
            None => tracing::debug!("Disconnect requested with no active session"),
        }
    }

    /// Disconnect and wait (bounded by the connect timeout) for queued frames
    /// to be written and the socket closed.
    pub async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        tracing::info!("Closing room {}", session.room_id);
        if let Some(tx) = session.shutdown.take() {
            let _ = tx.send(());
        }
        if time::timeout(self.config.connect_timeout, &mut session.task)
            .await
            .is_err()
        {
            tracing::warn!("Room {} did not close in time", session.room_id);
            session.task.abort();
        }
    }

    /// Queue a message as a `send_message` event. No delivery guarantee.
    pub fn send_message(&self, message: &Message) -> Result<(), SendError> {
        let result = self.enqueue(message);
        if let Err(ref e) = result {
            tracing::warn!("Message not sent: {}", e);
        }
        result
    }

    fn enqueue(&self, message: &Message) -> Result<(), SendError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.is_live())
            .ok_or(SendError::NotConnected)?;
        let payload = serde_json::to_value(message)?;
        let text = frame::encode_event(SEND_MESSAGE, &payload)?;
        session.outbound.send(text).map_err(|_| SendError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        match &self.session {
            Some(session) if session.is_live() => session.state.borrow().clone(),
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected { .. })
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Handshake and join. Used for the first connect and every reconnect.
async fn open_room(server_url: &str, room_id: &str) -> Result<EngineSocket, TransportError> {
    let mut socket = EngineSocket::connect(server_url).await?;
    socket
        .emit(JOIN_ROOM, &serde_json::Value::String(room_id.to_string()))
        .await?;
    Ok(socket)
}

/// Why the event loop of one socket ended.
enum Exit {
    /// Owner asked to leave (or went away). Do not reconnect.
    Shutdown,
    /// Socket failed or was closed by the server. Should reconnect.
    Lost(String),
}

enum Reconnect {
    Restored(u32),
    GaveUp(String),
    Shutdown,
}

struct RoomTask {
    server_url: String,
    room_id: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    socket: EngineSocket,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: oneshot::Receiver<()>,
    state: watch::Sender<ConnectionState>,
}

impl RoomTask {
    async fn run(mut self) {
        loop {
            match self.pump().await {
                Exit::Shutdown => {
                    self.flush().await;
                    self.socket.close().await;
                    break;
                }
                Exit::Lost(reason) => {
                    tracing::warn!("Room {} connection lost: {}", self.room_id, reason);
                    match self.reconnect().await {
                        Reconnect::Restored(attempts) => {
                            if !self.publish(TransportEvent::Reconnected { attempts }).await {
                                self.socket.close().await;
                                break;
                            }
                        }
                        Reconnect::GaveUp(last_error) => {
                            tracing::error!(
                                "Giving up on room {} after {} attempts: {}",
                                self.room_id,
                                self.policy.max_retries,
                                last_error
                            );
                            let _ = self
                                .publish(TransportEvent::Disconnected {
                                    reason: format!("{}; last error: {}", reason, last_error),
                                })
                                .await;
                            break;
                        }
                        Reconnect::Shutdown => break,
                    }
                }
            }
        }

        let _ = self.state.send(ConnectionState::Disconnected);
        tracing::info!("Room {} session ended", self.room_id);
    }

    /// Drive one socket until it fails or the owner shuts us down.
    async fn pump(&mut self) -> Exit {
        let liveness = self.socket.liveness_timeout();
        let silence = time::sleep(liveness);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                _ = &mut self.shutdown => return Exit::Shutdown,
                Some(text) = self.outbound.recv() => {
                    if let Err(e) = self.socket.send_text(&text).await {
                        return Exit::Lost(format!("send failed: {}", e));
                    }
                }
                frame = self.socket.recv_frame() => {
                    match frame {
                        Ok(Some(text)) => {
                            silence.as_mut().reset(Instant::now() + liveness);
                            if let Some(exit) = self.handle_frame(&text).await {
                                return exit;
                            }
                        }
                        Ok(None) => return Exit::Lost("WebSocket closed by server".to_string()),
                        Err(e) => return Exit::Lost(format!("receive failed: {}", e)),
                    }
                }
                _ = &mut silence => {
                    return Exit::Lost(format!("no traffic for {:?}", liveness));
                }
            }
        }
    }

    /// Write whatever the owner queued before asking us to stop.
    async fn flush(&mut self) {
        while let Ok(text) = self.outbound.try_recv() {
            if let Err(e) = self.socket.send_text(&text).await {
                tracing::warn!("Dropping queued frames for room {}: {}", self.room_id, e);
                break;
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) -> Option<Exit> {
        let packet = match frame::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Skipping undecodable frame: {}", e);
                return self.malformed(text, e.to_string()).await;
            }
        };

        match packet {
            Packet::Ping => {
                if let Err(e) = self.socket.send_text(frame::PONG).await {
                    return Some(Exit::Lost(format!("pong failed: {}", e)));
                }
            }
            Packet::Event { name, payload, .. } if name == RECEIVE_MESSAGE => {
                match serde_json::from_value::<Message>(payload) {
                    Ok(message) if message.has_content() => {
                        if !self.publish(TransportEvent::Message(message)).await {
                            return Some(Exit::Shutdown);
                        }
                    }
                    Ok(_) => {
                        tracing::warn!("Skipping message with neither text nor media");
                        return self.malformed(text, "message has no content".into()).await;
                    }
                    Err(e) => {
                        tracing::warn!("Skipping malformed message payload: {}", e);
                        return self.malformed(text, e.to_string()).await;
                    }
                }
            }
            Packet::Event { name, .. } => tracing::debug!("Ignoring event {}", name),
            Packet::Close | Packet::Disconnect => {
                return Some(Exit::Lost("server ended the session".to_string()));
            }
            other => tracing::debug!("Ignoring packet {:?}", other),
        }
        None
    }

    async fn malformed(&mut self, frame: &str, reason: String) -> Option<Exit> {
        let event = TransportEvent::Malformed {
            frame: frame.to_string(),
            reason,
        };
        if self.publish(event).await {
            None
        } else {
            Some(Exit::Shutdown)
        }
    }

    /// Deliver an event. `false` means the owner dropped its receiver.
    async fn publish(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn reconnect(&mut self) -> Reconnect {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.policy.max_retries {
            let _ = self.state.send(ConnectionState::Reconnecting {
                room_id: self.room_id.clone(),
                attempt,
            });

            let delay = self.policy.delay(attempt);
            tracing::info!(
                "Reconnecting to room {} in {:?} (attempt {}/{})",
                self.room_id,
                delay,
                attempt,
                self.policy.max_retries
            );

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = &mut self.shutdown => return Reconnect::Shutdown,
            }

            let opened = tokio::select! {
                r = time::timeout(self.connect_timeout, open_room(&self.server_url, &self.room_id)) => r,
                _ = &mut self.shutdown => return Reconnect::Shutdown,
            };

            match opened {
                Ok(Ok(socket)) => {
                    self.socket = socket;
                    let _ = self.state.send(ConnectionState::Connected {
                        room_id: self.room_id.clone(),
                    });
                    tracing::info!("Reconnected to room {}", self.room_id);
                    return Reconnect::Restored(attempt);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!("Reconnect attempt {} timed out", attempt);
                    last_error = TransportError::Timeout(self.connect_timeout).to_string();
                }
            }
        }

        Reconnect::GaveUp(last_error)
    }
}
