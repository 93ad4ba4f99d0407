//! Media upload to the chat server's `/upload` endpoint.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::client::{absolute_media_url, ApiError, ChatClient};
use crate::models::Media;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    media: Media,
}

/// Upload a file for a room and return the stored media record.
///
/// The returned `media_url` is always absolute, prefixed with `media_base`
/// when the server answers with a relative path.
pub async fn upload_media(
    client: &ChatClient,
    media_base: &str,
    room_id: &str,
    sender_id: &str,
    path: &Path,
) -> Result<Media, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string());

    tracing::info!(
        "Uploading {} ({} bytes) to room {}",
        file_name,
        bytes.len(),
        room_id
    );

    let part = Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/octet-stream")
        .map_err(ApiError::Client)?;
    let form = Form::new()
        .part("file", part)
        .text("chatroomId", room_id.to_string())
        .text("senderId", sender_id.to_string());

    let url = client.endpoint(&["upload"]);
    let resp = client.post_multipart(url.clone(), form).await?;
    let body = ChatClient::text(resp, url.as_str()).await?;

    let mut media = parse_upload_response(&body).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    media.media_url = absolute_media_url(media_base, &media.media_url);

    tracing::info!("Uploaded media available at {}", media.media_url);
    Ok(media)
}

fn parse_upload_response(body: &str) -> Result<Media, serde_json::Error> {
    serde_json::from_str::<UploadResponse>(body).map(|r| r.media)
}
