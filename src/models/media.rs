//! Uploaded media models

use serde::{Deserialize, Serialize};

/// Media record returned by the upload service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    #[serde(rename = "chatroomId")]
    pub room_id: String,
    pub sender_id: String,
    /// Usually server-relative, e.g. "/file/1713801287392-photo.jpg"
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
