//! Room controller: one open chatroom.
//!
//! `RoomSession` owns the room's timeline, history fetcher and transport.
//! Entering a room fetches history and builds the timeline before the socket
//! is connected, so nothing pushed live can be applied to a half-built
//! timeline. Leaving (or dropping the session) disconnects.

pub mod interactive;
pub mod outbound;
pub mod timeline;

use std::path::Path;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::api::client::{ApiError, ChatClient};
use crate::api::history::{normalize_media, History, HistoryFetcher};
use crate::api::upload;
use crate::config::Config;
use crate::models::Message;
use crate::transport::{TransportClient, TransportConfig, TransportError, TransportEvent};
use outbound::{Author, OutboundError, OutboundSender};
use timeline::{Appended, Timeline};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
}

/// Everything a room needs from configuration.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub client: ChatClient,
    pub media_base: String,
    pub transport: TransportConfig,
}

impl RoomSettings {
    pub fn from_config(config: &Config) -> Result<Self, RoomError> {
        Ok(Self {
            client: ChatClient::new(&config.server_url, config.fetch_timeout())?,
            media_base: config.media_base_url().to_string(),
            transport: config.transport(),
        })
    }
}

/// Per-feed summary of the initial history load.
#[derive(Debug, Default)]
pub struct HistoryReport {
    pub text_failure: Option<ApiError>,
    pub media_failure: Option<ApiError>,
    pub skipped: usize,
}

impl HistoryReport {
    fn from_history(history: &mut History) -> Self {
        Self {
            text_failure: history.text.failure.take(),
            media_failure: history.media.failure.take(),
            skipped: history.text.skipped + history.media.skipped,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.text_failure.is_none() && self.media_failure.is_none()
    }
}

/// What applying one transport event did to the room.
#[derive(Debug)]
pub enum RoomUpdate {
    /// A live message was placed in the timeline.
    Appended { message: Message, placement: Appended },
    /// A live message that was already shown.
    Duplicate(Message),
    /// An unusable inbound payload was dropped.
    Skipped { reason: String },
    /// The link came back and `inserted` missed messages were merged.
    /// `report` says whether the re-fetch of each feed succeeded.
    Replayed {
        inserted: usize,
        report: HistoryReport,
    },
    /// The link is gone for good; `connect()` may be retried.
    ConnectionLost { reason: String },
}

pub struct RoomSession {
    room_id: String,
    timeline: Timeline,
    fetcher: HistoryFetcher,
    client: ChatClient,
    media_base: String,
    transport: TransportClient,
    events: mpsc::Receiver<TransportEvent>,
    sender: OutboundSender,
    report: HistoryReport,
}

impl RoomSession {
    /// Enter a room: fetch history, build the timeline, then connect.
    ///
    /// A failed connect does not fail entry; the session stays readable and
    /// `connect()` can be retried.
    pub async fn enter(settings: RoomSettings, author: Author, room_id: &str) -> Self {
        let fetcher = HistoryFetcher::new(settings.client.clone(), settings.media_base.clone());
        let mut history = fetcher.fetch(room_id).await;
        let report = HistoryReport::from_history(&mut history);
        let (text, media) = history.into_feeds();
        let timeline = Timeline::build_initial(text, media);

        let (transport, events) = TransportClient::new(settings.transport);
        let mut session = Self {
            room_id: room_id.to_string(),
            timeline,
            fetcher,
            client: settings.client,
            media_base: settings.media_base,
            transport,
            events,
            sender: OutboundSender::new(author, room_id),
            report,
        };

        if let Err(e) = session.connect().await {
            tracing::warn!("Entered room {} offline: {}", room_id, e);
        }
        session
    }

    /// (Re)connect the live channel. A no-op while connected.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.transport.connect(&self.room_id).await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn history_report(&self) -> &HistoryReport {
        &self.report
    }

    pub fn author(&self) -> &Author {
        self.sender.author()
    }

    /// Wait for the next transport event. Cancel safe; pass the result to
    /// `apply`.
    ///
    /// Returns `None` once the transport can deliver nothing more.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub async fn apply(&mut self, event: TransportEvent) -> RoomUpdate {
        match event {
            TransportEvent::Message(mut message) => {
                normalize_media(&mut message, &self.media_base);
                match self.timeline.append(message.clone()) {
                    Appended::Duplicate => RoomUpdate::Duplicate(message),
                    placement => RoomUpdate::Appended { message, placement },
                }
            }
            TransportEvent::Malformed { frame, reason } => {
                tracing::debug!("Dropped frame {}", frame);
                RoomUpdate::Skipped { reason }
            }
            TransportEvent::Reconnected { attempts } => {
                tracing::info!(
                    "Room {} back online after {} attempts, replaying history",
                    self.room_id,
                    attempts
                );
                let (inserted, report) = self.replay().await;
                RoomUpdate::Replayed { inserted, report }
            }
            TransportEvent::Disconnected { reason } => RoomUpdate::ConnectionLost { reason },
        }
    }

    /// Re-fetch history and merge anything at or after the last seen timestamp.
    async fn replay(&mut self) -> (usize, HistoryReport) {
        let mut history = self.fetcher.fetch(&self.room_id).await;
        let report = HistoryReport::from_history(&mut history);
        if !report.is_complete() {
            tracing::warn!("Replay for room {} is incomplete", self.room_id);
        }
        let since = self.timeline.last_seen().map(str::to_string);
        let (text, media) = history.into_feeds();

        let mut missed: Vec<Message> = text
            .into_iter()
            .chain(media)
            .filter(|m| since.as_deref().map_or(true, |s| m.sent_at.as_str() >= s))
            .collect();
        missed.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));

        let inserted = self.timeline.merge_replay(missed);
        if inserted > 0 {
            tracing::info!("Replayed {} missed messages in room {}", inserted, self.room_id);
        }
        (inserted, report)
    }

    /// Send text and/or an already uploaded media URL.
    pub fn send(&self, text: &str, media_url: Option<&str>) -> Result<Message, RoomError> {
        Ok(self.sender.send(&self.transport, text, media_url)?)
    }

    /// Upload a file, then send it with an optional caption.
    pub async fn send_attachment(&self, text: &str, path: &Path) -> Result<Message, RoomError> {
        let media = upload::upload_media(
            &self.client,
            &self.media_base,
            &self.room_id,
            &self.sender.author().id,
            path,
        )
        .await?;
        self.send(text, Some(&media.media_url))
    }

    /// Leave the room. The transport is asked to disconnect immediately.
    pub fn leave(mut self) {
        self.transport.disconnect();
    }

    /// Leave the room once everything queued has been written.
    pub async fn close(mut self) {
        self.transport.close().await;
    }
}
