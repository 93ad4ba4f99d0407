//! REST side of the chat server: history feeds and media upload

pub mod client;
pub mod history;
pub mod upload;

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::room::interactive;
use crate::room::outbound::OutboundSender;
use crate::transport::TransportClient;
use client::ChatClient;

/// Print a room's merged history (prints to stdout).
pub async fn show_history(config: &Config, room_id: &str, limit: Option<usize>) -> Result<()> {
    let client = ChatClient::new(&config.server_url, config.fetch_timeout())
        .context("Invalid server configuration")?;
    let fetcher = history::HistoryFetcher::new(client, config.media_base_url());
    let mut history = fetcher.fetch(room_id).await;

    for feed in [&mut history.text, &mut history.media] {
        if let Some(e) = feed.failure.take() {
            println!("(history feed unavailable: {})", e);
        }
        if feed.skipped > 0 {
            println!("({} unreadable records skipped)", feed.skipped);
        }
    }

    let (text, media) = history.into_feeds();
    let timeline = crate::room::timeline::Timeline::build_initial(text, media);

    println!("\nRoom {}:", room_id);
    println!("{:-<60}", "");

    if timeline.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    let own_id = config.user.as_ref().map(|u| u.id.as_str()).unwrap_or("");
    let messages = timeline.as_slice();
    let start = limit.map_or(0, |n| messages.len().saturating_sub(n));
    for msg in &messages[start..] {
        println!("{}", interactive::format_message(msg, own_id));
    }

    Ok(())
}

/// Join a room, send one message, leave. History is not fetched.
pub async fn send_message(
    config: &Config,
    room_id: &str,
    text: &str,
    attachment: Option<&Path>,
) -> Result<()> {
    let author = config.author()?;

    let media_url = match attachment {
        Some(path) => {
            let client = ChatClient::new(&config.server_url, config.fetch_timeout())
                .context("Invalid server configuration")?;
            let media =
                upload::upload_media(&client, config.media_base_url(), room_id, &author.id, path)
                    .await
                    .context("Upload failed")?;
            Some(media.media_url)
        }
        None => None,
    };

    let (mut transport, _events) = TransportClient::new(config.transport());
    transport
        .connect(room_id)
        .await
        .with_context(|| format!("Could not connect to room {}", room_id))?;

    let sender = OutboundSender::new(author, room_id);
    let sent = sender
        .send(&transport, text, media_url.as_deref())
        .context("Failed to send message")?;
    tracing::debug!("Sent {:?}", sent);

    transport.close().await;
    println!("Message sent.");
    Ok(())
}

/// Upload a file to a room and print its URL.
pub async fn upload_file(config: &Config, room_id: &str, path: &Path) -> Result<()> {
    let author = config.author()?;
    let client = ChatClient::new(&config.server_url, config.fetch_timeout())
        .context("Invalid server configuration")?;
    let media = upload::upload_media(&client, config.media_base_url(), room_id, &author.id, path)
        .await
        .context("Upload failed")?;
    println!("{}", media.media_url);
    Ok(())
}
