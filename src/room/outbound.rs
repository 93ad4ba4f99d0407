//! Composing and pushing outgoing messages.
//!
//! Sent messages are not added to the local timeline; they show up when the
//! server echoes them back on `receive_message`.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::models::Message;
use crate::transport::{SendError, TransportClient};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("message has neither text nor media")]
    Empty,
}

/// The local user, as the author of outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
}

/// Build a message from local input. Text is trimmed; blank parts are dropped.
pub fn compose(
    author: &Author,
    room_id: &str,
    text: &str,
    media_url: Option<&str>,
) -> Result<Message, ComposeError> {
    let body = Some(text.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let media_ref = media_url
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    if body.is_none() && media_ref.is_none() {
        return Err(ComposeError::Empty);
    }

    Ok(Message {
        room_id: room_id.to_string(),
        sender_id: author.id.clone(),
        sender_name: Some(author.name.clone()),
        body,
        media_ref,
        sent_at: now_timestamp(),
    })
}

/// Current UTC time in the fixed-width ISO-8601 form the server uses.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Sends on behalf of one author in one room.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    author: Author,
    room_id: String,
}

impl OutboundSender {
    pub fn new(author: Author, room_id: impl Into<String>) -> Self {
        Self {
            author,
            room_id: room_id.into(),
        }
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Compose and hand the message to the transport. Returns what was sent.
    pub fn send(
        &self,
        transport: &TransportClient,
        text: &str,
        media_url: Option<&str>,
    ) -> Result<Message, OutboundError> {
        let message = compose(&self.author, &self.room_id, text, media_url)?;
        transport.send_message(&message)?;
        tracing::debug!("Queued message for room {}", self.room_id);
        Ok(message)
    }
}
