use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Poll interval of the per-connection liveness monitor, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Idle duration after which a ping probe is sent, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// How long to wait for activity after a probe before disconnecting, in seconds
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,
}

impl WebSocketConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout)
    }
}

fn default_poll_interval() -> u64 {
    1
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_pong_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Group membership resolution settings.
///
/// `memberships` is a user-id -> group-ids mapping used by the built-in static
/// directory when no external directory service is wired in.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupsConfig {
    #[serde(default = "default_group_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub memberships: HashMap<String, Vec<String>>,
}

fn default_group_cache_ttl() -> u64 {
    30
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_group_cache_ttl(),
            memberships: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL for the notification store; in-memory store when unset
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("websocket.poll_interval", 1)?
            .set_default("websocket.idle_timeout", 60)?
            .set_default("websocket.pong_timeout", 15)?
            .set_default("groups.cache_ttl_seconds", 30)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, JWT_SECRET, DATABASE_URL, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            idle_timeout: default_idle_timeout(),
            pong_timeout: default_pong_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let ws = WebSocketConfig::default();
        assert_eq!(ws.poll_interval, 1);
        assert_eq!(ws.idle_timeout, 60);
        assert_eq!(ws.pong_timeout, 15);
    }
}
