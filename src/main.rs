//! roomchat - chatroom client for the terminal
//!
//! Reads a room's history over REST, then follows it live over Socket.IO.

mod api;
mod config;
mod models;
mod room;
#[cfg(test)]
mod testutil;
mod transport;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, UserProfile};

#[derive(Parser)]
#[command(name = "roomchat")]
#[command(about = "Terminal client for chatroom message timelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Chat server URL (overrides the configured one for this run)
    #[arg(long, global = true)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or update the saved configuration
    Configure {
        /// Your user ID, stamped on outgoing messages
        #[arg(long)]
        user_id: Option<String>,

        /// Your display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Print a room's history
    History {
        /// Chatroom ID
        room: String,

        /// Only show the last N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Join a room and follow it live
    Join {
        /// Chatroom ID
        room: String,
    },

    /// Send one message to a room
    Send {
        /// Chatroom ID
        room: String,

        /// Message text
        text: String,

        /// Upload a file and attach it
        #[arg(short, long)]
        attach: Option<PathBuf>,
    },

    /// Upload a file to a room and print its URL
    Upload {
        /// Chatroom ID
        room: String,

        /// File to upload
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;
    let configuring = matches!(cli.command, Commands::Configure { .. });
    if let (Some(server), false) = (&cli.server, configuring) {
        config.server_url = server.clone();
    }

    match cli.command {
        Commands::Configure { user_id, name } => {
            configure(&mut config, cli.server, user_id, name)?;
        }
        Commands::History { room, limit } => {
            api::show_history(&config, &room, limit).await?;
        }
        Commands::Join { room } => {
            tracing::info!("Joining room {}...", room);
            crate::room::interactive::run(&config, &room).await?;
        }
        Commands::Send { room, text, attach } => {
            tracing::info!("Sending message...");
            api::send_message(&config, &room, &text, attach.as_deref()).await?;
        }
        Commands::Upload { room, path } => {
            api::upload_file(&config, &room, &path).await?;
        }
    }

    Ok(())
}

fn configure(
    config: &mut Config,
    server: Option<String>,
    user_id: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let changed = server.is_some() || user_id.is_some() || name.is_some();

    if let Some(server) = server {
        config.server_url = server;
    }
    if user_id.is_some() || name.is_some() {
        let current = config.user.take();
        let id = user_id
            .or_else(|| current.as_ref().map(|u| u.id.clone()))
            .ok_or_else(|| anyhow::anyhow!("--user-id is required the first time"))?;
        let name = name
            .or_else(|| current.map(|u| u.name))
            .unwrap_or_else(|| id.clone());
        config.user = Some(UserProfile { id, name });
    }

    if changed {
        config.save()?;
        println!("Saved {}", Config::config_path()?.display());
    }

    println!("Server: {}", config.server_url);
    match &config.user {
        Some(user) => println!("User:   {} ({})", user.name, user.id),
        None => println!("User:   (not set)"),
    }
    Ok(())
}
