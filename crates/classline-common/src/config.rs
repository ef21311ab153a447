//! Configuration for Classline

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Chat gateway configuration
    pub channel: ChannelConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Chat gateway configuration.
///
/// The gateway is the external messaging provider: it accepts a chat id and a
/// text body and returns a provider message id. It also exposes the group and
/// contact directory used for broadcast fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Gateway base URL
    pub base_url: String,

    /// Bearer token for gateway requests
    pub api_token: String,

    /// Request timeout in seconds
    #[serde(default = "default_channel_timeout")]
    pub timeout_secs: u64,
}

fn default_channel_timeout() -> u64 {
    30
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval between dispatch ticks (seconds)
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Maximum entries pulled per tenant per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Age after which a Processing lease is treated as abandoned (seconds)
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            batch_size: default_batch_size(),
            lease_timeout_secs: default_lease_timeout(),
        }
    }
}

fn default_tick_secs() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    10
}

fn default_lease_timeout() -> u64 {
    300
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the API server
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/classline/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.tick_secs, 5);
        assert_eq!(scheduler.batch_size, 10);
        assert_eq!(scheduler.lease_timeout_secs, 300);

        let api = ApiConfig::default();
        assert_eq!(api.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
url = "postgres://localhost/classline"

[channel]
base_url = "https://gateway.example.com"
api_token = "secret"

[scheduler]
tick_secs = 2
batch_size = 5
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/classline");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.channel.timeout_secs, 30);
        assert_eq!(config.scheduler.tick_secs, 2);
        assert_eq!(config.scheduler.batch_size, 5);
        assert_eq!(config.logging.level, "info");
    }
}
