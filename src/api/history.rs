//! Persisted room history: the text feed and the media feed.
//!
//! Both feeds are fetched concurrently and independently. A failing feed
//! degrades to an empty list with its error recorded, and a single bad
//! record is skipped instead of discarding the whole feed.

use serde_json::Value;

use super::client::{absolute_media_url, ApiError, ChatClient};
use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Text,
    Media,
}

impl FeedKind {
    fn segments(self) -> [&'static str; 3] {
        match self {
            FeedKind::Text => ["api", "messages", "chatroom"],
            FeedKind::Media => ["api", "media", "chatroom"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Text => "messages",
            FeedKind::Media => "media",
        }
    }
}

/// Outcome of one feed.
#[derive(Debug, Default)]
pub struct Feed {
    pub messages: Vec<Message>,
    /// Records dropped because they could not be decoded or had no content.
    pub skipped: usize,
    /// Set when the whole feed failed; `messages` is then empty.
    pub failure: Option<ApiError>,
}

#[derive(Debug, Default)]
pub struct History {
    pub text: Feed,
    pub media: Feed,
}

impl History {
    pub fn into_feeds(self) -> (Vec<Message>, Vec<Message>) {
        (self.text.messages, self.media.messages)
    }
}

pub struct HistoryFetcher {
    client: ChatClient,
    media_base: String,
}

impl HistoryFetcher {
    /// `media_base` is the prefix for server-relative media paths.
    pub fn new(client: ChatClient, media_base: impl Into<String>) -> Self {
        Self {
            client,
            media_base: media_base.into(),
        }
    }

    /// Fetch both feeds for a room concurrently.
    pub async fn fetch(&self, room_id: &str) -> History {
        let (text, media) = tokio::join!(
            self.fetch_feed(room_id, FeedKind::Text),
            self.fetch_feed(room_id, FeedKind::Media)
        );
        tracing::info!(
            "Room {} history: {} messages, {} media",
            room_id,
            text.messages.len(),
            media.messages.len()
        );
        History { text, media }
    }

    /// Fetch one feed. Never fails; errors are recorded on the returned feed.
    pub async fn fetch_feed(&self, room_id: &str, kind: FeedKind) -> Feed {
        match self.try_fetch(room_id, kind).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!("Fetching {} for room {} failed: {}", kind.as_str(), room_id, e);
                Feed {
                    failure: Some(e),
                    ..Feed::default()
                }
            }
        }
    }

    async fn try_fetch(&self, room_id: &str, kind: FeedKind) -> Result<Feed, ApiError> {
        let [a, b, c] = kind.segments();
        let url = self.client.endpoint(&[a, b, c, room_id]);
        let resp = self.client.get(url.clone()).await?;
        let body = ChatClient::text(resp, url.as_str()).await?;

        let (mut messages, skipped) = parse_records(&body).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        for msg in &mut messages {
            normalize_media(msg, &self.media_base);
        }

        if skipped > 0 {
            tracing::warn!(
                "Skipped {} unusable {} records for room {}",
                skipped,
                kind.as_str(),
                room_id
            );
        }

        Ok(Feed {
            messages,
            skipped,
            failure: None,
        })
    }
}

/// Rewrite a message's media reference to an absolute URL, in place.
///
/// History and live messages must agree on this form, or the same upload
/// would not be recognized as a duplicate.
pub fn normalize_media(msg: &mut Message, media_base: &str) {
    let absolute = msg
        .media()
        .map(|media| absolute_media_url(media_base, media));
    if absolute.is_some() {
        msg.media_ref = absolute;
    }
}

/// Decode a JSON array of message records, one record at a time.
///
/// Fails only if the body is not a JSON array. Returns the usable messages
/// and the number of records skipped.
pub fn parse_records(body: &str) -> Result<(Vec<Message>, usize), serde_json::Error> {
    let records: Vec<Value> = serde_json::from_str(body)?;
    let mut messages = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        match serde_json::from_value::<Message>(record) {
            Ok(msg) if msg.has_content() => messages.push(msg),
            Ok(_) => {
                tracing::debug!("Skipping record with neither text nor media");
                skipped += 1;
            }
            Err(e) => {
                tracing::debug!("Skipping malformed record: {}", e);
                skipped += 1;
            }
        }
    }

    Ok((messages, skipped))
}
