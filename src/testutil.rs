//! Local servers used by the network tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const OPEN_PACKET: &str =
    r#"0{"sid":"mock-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const CONNECT_ACK: &str = r#"40{"sid":"mock-socket"}"#;

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    Drop,
}

/// Minimal socket.io server: performs the handshake, records every text
/// frame clients send, and pushes frames on request.
pub struct MockSocketServer {
    pub url: String,
    frames: mpsc::UnboundedReceiver<String>,
    commands: broadcast::Sender<ServerCommand>,
    connections: Arc<AtomicUsize>,
    accept: JoinHandle<()>,
}

impl MockSocketServer {
    pub async fn start() -> Self {
        Self::start_with_open(OPEN_PACKET).await
    }

    /// Like `start`, but greets clients with the given engine.io open packet.
    pub async fn start_with_open(open_packet: &str) -> Self {
        let open_packet: Arc<str> = Arc::from(open_packet);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let commands_tx = commands.clone();
        let counter = Arc::clone(&connections);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_socket(
                    stream,
                    Arc::clone(&open_packet),
                    frames_tx.clone(),
                    commands_tx.subscribe(),
                    Arc::clone(&counter),
                ));
            }
        });

        Self {
            url,
            frames,
            commands,
            connections,
            accept,
        }
    }

    /// Next text frame any client sent after its handshake.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("mock server stopped")
    }

    /// Assert that clients send nothing for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(wait, self.frames.recv()).await {
            panic!("unexpected client frame: {}", frame);
        }
    }

    pub fn push_event(&self, name: &str, payload: Value) {
        let frame = format!("42{}", json!([name, payload]));
        self.push_raw(&frame);
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.commands.send(ServerCommand::Send(frame.to_string()));
    }

    /// Close every open client connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    /// Stop listening and close every open connection. Later connects are
    /// refused.
    pub fn stop(&self) {
        self.accept.abort();
        self.drop_connections();
    }

    /// Number of completed handshakes so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_socket(
    stream: TcpStream,
    open_packet: Arc<str>,
    frames: mpsc::UnboundedSender<String>,
    mut commands: broadcast::Receiver<ServerCommand>,
    connections: Arc<AtomicUsize>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    if ws.send(Message::Text(open_packet.to_string())).await.is_err() {
        return;
    }
    match ws.next().await {
        Some(Ok(Message::Text(text))) if text.starts_with("40") => {}
        _ => return,
    }
    if ws.send(Message::Text(CONNECT_ACK.to_string())).await.is_err() {
        return;
    }
    connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames.send(text);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(text)) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::Drop) => {
                    let _ = ws.close(None).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Canned responses for the history and upload endpoints.
#[derive(Clone)]
pub struct MockHttp {
    state: Arc<Mutex<HttpState>>,
}

struct HttpState {
    messages: (StatusCode, String),
    media: (StatusCode, String),
    uploads: Vec<String>,
}

impl MockHttp {
    /// Serve `messages` and `media` as the two history feeds. Returns the base URL.
    pub async fn start(messages: Value, media: Value) -> (String, Self) {
        let mock = Self {
            state: Arc::new(Mutex::new(HttpState {
                messages: (StatusCode::OK, messages.to_string()),
                media: (StatusCode::OK, media.to_string()),
                uploads: Vec::new(),
            })),
        };

        let app = Router::new()
            .route("/api/messages/chatroom/{room}", get(messages_feed))
            .route("/api/media/chatroom/{room}", get(media_feed))
            .route("/upload", post(upload))
            .with_state(mock.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (url, mock)
    }

    pub fn set_messages(&self, status: StatusCode, body: impl Into<String>) {
        self.state.lock().unwrap().messages = (status, body.into());
    }

    pub fn set_media(&self, status: StatusCode, body: impl Into<String>) {
        self.state.lock().unwrap().media = (status, body.into());
    }

    /// Raw request bodies received on `/upload`.
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }
}

async fn messages_feed(State(mock): State<MockHttp>, Path(_room): Path<String>) -> (StatusCode, String) {
    mock.state.lock().unwrap().messages.clone()
}

async fn media_feed(State(mock): State<MockHttp>, Path(_room): Path<String>) -> (StatusCode, String) {
    mock.state.lock().unwrap().media.clone()
}

async fn upload(State(mock): State<MockHttp>, body: String) -> Json<Value> {
    mock.state.lock().unwrap().uploads.push(body);
    Json(json!({
        "message": "File uploaded",
        "media": {
            "chatroomId": "room-1",
            "senderId": "u1",
            "mediaUrl": "/file/1713801287392-photo.jpg"
        }
    }))
}
