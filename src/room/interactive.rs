//! Line-oriented room view for the terminal.
//!
//! Prints the merged history, then live updates; every stdin line is sent.
//! `/attach <path> [caption]` uploads a file first, `/quit` leaves.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use super::timeline::Appended;
use super::{HistoryReport, RoomSession, RoomSettings, RoomUpdate};
use crate::config::Config;
use crate::models::Message;

/// Input line, parsed.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Text(&'a str),
    Attach { path: &'a str, caption: &'a str },
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line == "/quit" || line == "/exit" {
        return Input::Quit;
    }
    if let Some(rest) = line.strip_prefix("/attach") {
        let rest = rest.trim_start();
        if !rest.is_empty() {
            let (path, caption) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            return Input::Attach {
                path,
                caption: caption.trim(),
            };
        }
    }
    Input::Text(line)
}

/// One timeline entry as a terminal line.
pub fn format_message(msg: &Message, own_id: &str) -> String {
    let who = if msg.is_from(own_id) {
        "you".to_string()
    } else {
        msg.display_name().to_string()
    };
    let mut line = format!("[{}] {}:", msg.sent_at, who);
    if let Some(text) = msg.text() {
        line.push(' ');
        line.push_str(text);
    }
    if let Some(media) = msg.media() {
        line.push_str(&format!(" <{}>", media));
    }
    line
}

/// Notes for a history load that failed or skipped records.
fn report_notes(report: &HistoryReport) -> Vec<String> {
    let mut notes = Vec::new();
    if let Some(ref e) = report.text_failure {
        notes.push(format!("(message history unavailable: {})", e));
    }
    if let Some(ref e) = report.media_failure {
        notes.push(format!("(media history unavailable: {})", e));
    }
    if report.skipped > 0 {
        notes.push(format!("({} unreadable records skipped)", report.skipped));
    }
    notes
}

/// Print the timeline, with per-feed failures noted.
pub fn print_timeline(room: &RoomSession, limit: Option<usize>) {
    for note in report_notes(room.history_report()) {
        println!("{}", note);
    }

    let messages = room.timeline().as_slice();
    if messages.is_empty() {
        println!("(no messages)");
        return;
    }

    let start = limit.map_or(0, |n| messages.len().saturating_sub(n));
    for msg in &messages[start..] {
        println!("{}", format_message(msg, &room.author().id));
    }
}

/// Join a room and stay in it until `/quit`, EOF or Ctrl+C.
pub async fn run(config: &Config, room_id: &str) -> Result<()> {
    let author = config.author()?;
    let settings = RoomSettings::from_config(config).context("Invalid server configuration")?;

    let mut room = RoomSession::enter(settings, author, room_id).await;
    println!("Room {}", room.room_id());
    println!("{:-<60}", "");
    print_timeline(&room, None);

    if room.is_connected() {
        println!("Connected. Type to send, /attach <path> [caption], /quit to leave.");
    } else {
        println!("Offline: live updates unavailable. Messages cannot be sent.");
    }

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut interrupted = false;

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    Some(line) => line.context("Failed to read stdin")?,
                    None => break,
                };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Text(text) => {
                        if let Err(e) = room.send(text, None) {
                            println!("(not sent: {})", e);
                        }
                    }
                    Input::Attach { path, caption } => {
                        if let Err(e) = room.send_attachment(caption, Path::new(path)).await {
                            println!("(attachment not sent: {})", e);
                        }
                    }
                }
            }
            event = room.next_event() => {
                match event {
                    Some(event) => {
                        let update = room.apply(event).await;
                        show_update(&room, update);
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Leaving room...");
                interrupted = true;
                break;
            }
        }
    }

    if interrupted {
        room.leave();
    } else {
        room.close().await;
    }
    Ok(())
}

fn show_update(room: &RoomSession, update: RoomUpdate) {
    match update {
        RoomUpdate::Appended { message, placement } => {
            let line = format_message(&message, &room.author().id);
            match placement {
                Appended::Inserted { index } => println!("{} (earlier, #{})", line, index + 1),
                _ => println!("{}", line),
            }
        }
        RoomUpdate::Duplicate(message) => {
            tracing::debug!(
                "Already shown: message from {} at {}",
                message.sender_id,
                message.sent_at
            );
        }
        RoomUpdate::Skipped { reason } => {
            tracing::debug!("Skipped inbound payload: {}", reason);
        }
        RoomUpdate::Replayed { inserted, report } => {
            println!("(reconnected, {} missed messages)", inserted);
            for note in report_notes(&report) {
                println!("{}", note);
            }
            if inserted > 0 {
                let messages = room.timeline().as_slice();
                for msg in &messages[messages.len().saturating_sub(inserted)..] {
                    println!("{}", format_message(msg, &room.author().id));
                }
            }
        }
        RoomUpdate::ConnectionLost { reason } => {
            println!("(connection lost: {})", reason);
        }
    }
}
