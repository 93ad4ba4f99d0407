//! Message-related models

use serde::{Deserialize, Serialize};

/// Display name used when a message carries no sender name.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Chat message as exchanged with the chat server.
///
/// The same shape is used by both history feeds and by the live socket
/// events. `sent_at` is an opaque string and the only ordering key: it is
/// compared lexicographically, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "chatroomId", default)]
    pub room_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(rename = "content", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "mediaUrl", default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(rename = "timestamp", default, skip_serializing_if = "String::is_empty")]
    pub sent_at: String,
}

/// Identity of a message inside a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    sender_id: String,
    sent_at: String,
    body: Option<String>,
    media_ref: Option<String>,
}

impl Message {
    /// Sender display name, falling back to "Unknown".
    pub fn display_name(&self) -> &str {
        self.sender_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_SENDER)
    }

    /// Text body, if non-blank.
    pub fn text(&self) -> Option<&str> {
        non_blank(self.body.as_deref())
    }

    /// Attached media URL, if non-blank.
    pub fn media(&self) -> Option<&str> {
        non_blank(self.media_ref.as_deref())
    }

    /// A message must carry text, media, or both.
    pub fn has_content(&self) -> bool {
        self.text().is_some() || self.media().is_some()
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            sender_id: self.sender_id.clone(),
            sent_at: self.sent_at.clone(),
            body: self.body.clone(),
            media_ref: self.media_ref.clone(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
