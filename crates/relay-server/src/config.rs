//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Placeholder secret that must be replaced before serving traffic.
pub const PLACEHOLDER_JWT_SECRET: &str = "change-me";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Connection keepalive configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Rate limiting for credential endpoints.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Token lifetime in hours.
    #[serde(default = "default_token_expiry_hours")]
    pub token_expiry_hours: i64,
}

/// CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins, matched exactly against the Origin header.
    #[serde(default = "default_origins")]
    pub origins: Vec<String>,
}

impl CorsConfig {
    /// Whether `origin` is in the allow-list. Empty origins never are.
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        !origin.is_empty() && self.origins.iter().any(|o| o == origin)
    }
}

/// Connection keepalive configuration.
///
/// Defaults follow the wire contract: a 60 second pong window, a 10 second
/// write deadline, and pings at 9/10 of the pong window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How long the peer has to answer a ping, in milliseconds.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,

    /// Per-write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

impl HeartbeatConfig {
    /// Rolling read deadline.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Per-write deadline.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Idle ping interval: 9/10 of the pong window, so a ping is always in
    /// flight before the peer's deadline can expire.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms * 9 / 10)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window per client IP.
    #[serde(default = "default_rate_limit")]
    pub limit: u32,

    /// Window length in seconds.
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_database_url() -> String {
    std::env::var("RELAY_DATABASE_URL").unwrap_or_else(|_| "sqlite://relay.db".to_string())
}

fn default_max_connections() -> u32 {
    5
}

fn default_jwt_secret() -> String {
    std::env::var("RELAY_JWT_SECRET").unwrap_or_else(|_| PLACEHOLDER_JWT_SECRET.to_string())
}

fn default_token_expiry_hours() -> i64 {
    24
}

fn default_origins() -> Vec<String> {
    std::env::var("RELAY_CORS_ORIGINS")
        .map(|v| {
            v.split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| {
            vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ]
        })
}

fn default_pong_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_rate_limit() -> u32 {
    10
}

fn default_rate_window() -> u64 {
    300
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            cors: CorsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_expiry_hours: default_token_expiry_hours(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_origins(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_timeout_ms: default_pong_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_rate_window(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host/port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat.pong_timeout_ms, 60_000);
        assert_eq!(config.rate_limit.limit, 10);
    }

    #[test]
    fn test_ping_interval_is_nine_tenths_of_pong_window() {
        let heartbeat = HeartbeatConfig::default();
        assert_eq!(heartbeat.ping_interval(), Duration::from_secs(54));
        assert_eq!(heartbeat.pong_timeout(), Duration::from_secs(60));
        assert_eq!(heartbeat.write_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_cors_allows() {
        let cors = CorsConfig {
            origins: vec!["http://localhost:5173".to_string()],
        };
        assert!(cors.allows("http://localhost:5173"));
        assert!(!cors.allows("http://evil.example"));
        assert!(!cors.allows(""));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [heartbeat]
            pong_timeout_ms = 1000

            [cors]
            origins = ["http://example.com"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.heartbeat.pong_timeout_ms, 1000);
        assert_eq!(config.heartbeat.write_timeout_ms, 10_000);
        assert_eq!(config.cors.origins, vec!["http://example.com"]);
    }
}
