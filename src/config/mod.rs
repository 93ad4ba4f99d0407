//! Configuration storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::room::outbound::Author;
use crate::transport::{ReconnectPolicy, TransportConfig};

pub const DEFAULT_SERVER_URL: &str = "https://chat-server-y96l.onrender.com";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat server base URL (REST endpoints)
    pub server_url: String,
    /// Socket.IO endpoint, when it differs from `server_url`
    pub socket_url: Option<String>,
    /// Prefix for server-relative media paths, when it differs from `server_url`
    pub media_base_url: Option<String>,
    /// Timeout for each history/upload request
    pub fetch_timeout_secs: u64,
    /// Timeout for the socket handshake
    pub connect_timeout_secs: u64,
    /// Capacity of the inbound event queue
    pub event_buffer: usize,
    pub reconnect: ReconnectSettings,
    /// Local user (author of outgoing messages)
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            socket_url: None,
            media_base_url: None,
            fetch_timeout_secs: 10,
            connect_timeout_secs: 10,
            event_buffer: 256,
            reconnect: ReconnectSettings::default(),
            user: None,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 64_000,
            max_retries: 5,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "roomchat", "roomchat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Keep the user profile private
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn socket_url(&self) -> &str {
        self.socket_url.as_deref().unwrap_or(&self.server_url)
    }

    pub fn media_base_url(&self) -> &str {
        self.media_base_url.as_deref().unwrap_or(&self.server_url)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            server_url: self.socket_url().to_string(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            reconnect: ReconnectPolicy {
                initial_backoff: Duration::from_millis(self.reconnect.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.reconnect.max_backoff_ms),
                max_retries: self.reconnect.max_retries,
            },
            event_buffer: self.event_buffer,
        }
    }

    pub fn author(&self) -> Result<Author> {
        let user = self
            .user
            .as_ref()
            .context("No user configured. Run 'roomchat configure --user-id ID --name NAME'.")?;
        Ok(Author {
            id: user.id.clone(),
            name: user.name.clone(),
        })
    }
}
