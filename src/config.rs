//! Configuration for the relay server and editor sessions

use std::time::Duration;

use clap::Parser;

/// Name of the room hosting block metadata and content for every document
pub const DEFAULT_GLOBAL_ROOM: &str = "global-blocks";

/// Relay server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "mirrordoc", about = "Relay server for collaborative documents")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "MIRRORDOC_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// SQLite database used for saved documents
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:mirrordoc.db")]
    pub database_url: String,

    /// Maximum pooled database connections
    #[arg(long, env = "MIRRORDOC_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

/// Timing of the sync orchestrator
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Coalescing window for local edits before they are pushed
    pub push_debounce: Duration,
    /// Period of the subscription maintenance sweep
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_debounce: Duration::from_millis(1000),
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

/// Settings for one open document
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub document_id: String,
    pub title: String,
    /// Display name published over presence
    pub user: String,
    pub global_room: String,
    pub autosave_debounce: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub sync: SyncConfig,
}

impl SessionConfig {
    pub fn new(document_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: "Untitled".to_string(),
            user: user.into(),
            global_room: DEFAULT_GLOBAL_ROOM.to_string(),
            autosave_debounce: Duration::from_secs(3),
            reconnect_initial_backoff: Duration::from_millis(500),
            reconnect_max_backoff: Duration::from_secs(10),
            sync: SyncConfig::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::parse_from(["mirrordoc"]);
        assert_eq!(config.max_connections, 5);
        assert!(config.database_url.starts_with("sqlite:"));
    }

    #[test]
    fn test_server_config_flags() {
        let config = ServerConfig::parse_from([
            "mirrordoc",
            "--bind",
            "127.0.0.1:9000",
            "--database-url",
            "sqlite::memory:",
        ]);
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new("doc-1", "alice").with_title("Notes");
        assert_eq!(config.global_room, DEFAULT_GLOBAL_ROOM);
        assert_eq!(config.autosave_debounce, Duration::from_secs(3));
        assert_eq!(config.sync.push_debounce, Duration::from_secs(1));
        assert_eq!(config.title, "Notes");
    }
}
