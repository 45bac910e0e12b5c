//! Runtime configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_*)
//! - TOML configuration file
//! - `--config <path>` on the command line

use anyhow::{Context, Result};
use parley_client::BrokerConfig;
use parley_core::{ServiceConfig, StoreConfig};
use parley_transport::MemoryTransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Request and response topics.
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Server-side membership settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-side call settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// In-process transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Hub addresses for `parley server` and `parley client`.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Topic names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_request_topic")]
    pub request: String,

    #[serde(default = "default_response_topic")]
    pub response: String,
}

/// Membership store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Generated nicknames are drawn from `user0..user<nickname_range>`.
    #[serde(default = "default_nickname_range")]
    pub nickname_range: u32,
}

/// Correlation broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long a call waits for its response, in milliseconds. 0 waits forever.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Responses kept for callers that have not registered yet.
    #[serde(default = "default_unclaimed_capacity")]
    pub unclaimed_capacity: usize,
}

/// Memory transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Records buffered per topic before slow subscribers lag.
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,

    /// Maximum payload size in bytes.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

/// Hub addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address `parley server` listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address `parley client` connects to.
    #[serde(default = "default_server")]
    pub server: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_request_topic() -> String {
    std::env::var("PARLEY_REQUEST_TOPIC").unwrap_or_else(|_| "rpcRequestTopic".to_string())
}

fn default_response_topic() -> String {
    std::env::var("PARLEY_RESPONSE_TOPIC").unwrap_or_else(|_| "rpcResponseTopic".to_string())
}

fn default_nickname_range() -> u32 {
    99_999
}

fn default_call_timeout() -> u64 {
    std::env::var("PARLEY_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|t| t.parse().ok())
        .unwrap_or(30_000)
}

fn default_unclaimed_capacity() -> usize {
    1024
}

fn default_topic_capacity() -> usize {
    1024
}

fn default_max_payload_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_listen() -> String {
    std::env::var("PARLEY_LISTEN").unwrap_or_else(|_| "0.0.0.0:7400".to_string())
}

fn default_server() -> String {
    std::env::var("PARLEY_SERVER").unwrap_or_else(|_| "127.0.0.1:7400".to_string())
}

fn default_metrics_enabled() -> bool {
    std::env::var("PARLEY_METRICS")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn default_metrics_port() -> u16 {
    std::env::var("PARLEY_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090)
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            request: default_request_topic(),
            response: default_response_topic(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            nickname_range: default_nickname_range(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            unclaimed_capacity: default_unclaimed_capacity(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            topic_capacity: default_topic_capacity(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            server: default_server(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

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

    /// Settings for the correlation broker.
    #[must_use]
    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            request_topic: self.topics.request.clone(),
            response_topic: self.topics.response.clone(),
            call_timeout: match self.client.call_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            unclaimed_capacity: self.client.unclaimed_capacity,
        }
    }

    /// Settings for the request service.
    #[must_use]
    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            request_topic: self.topics.request.clone(),
            response_topic: self.topics.response.clone(),
        }
    }

    /// Settings for the membership store. The RPC topics are never joinable.
    #[must_use]
    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            nickname_range: self.server.nickname_range,
            reserved_channels: vec![self.topics.request.clone(), self.topics.response.clone()],
        }
    }

    /// Settings for the memory transport.
    #[must_use]
    pub fn transport(&self) -> MemoryTransportConfig {
        MemoryTransportConfig {
            topic_capacity: self.transport.topic_capacity,
            max_payload_size: self.transport.max_payload_size,
            ..MemoryTransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.nickname_range, 99_999);
        assert_eq!(config.client.unclaimed_capacity, 1024);
        assert_eq!(config.transport.max_payload_size, 64 * 1024);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [topics]
            request = "requests"
            response = "responses"

            [client]
            call_timeout_ms = 0

            [network]
            listen = "127.0.0.1:9000"

            [metrics]
            enabled = true
            port = 9100
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.topics.request, "requests");
        assert_eq!(config.client.call_timeout_ms, 0);
        assert_eq!(config.network.listen, "127.0.0.1:9000");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let mut config = Config::default();
        config.client.call_timeout_ms = 0;
        assert_eq!(config.broker().call_timeout, None);

        config.client.call_timeout_ms = 1500;
        assert_eq!(config.broker().call_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_rpc_topics_are_reserved() {
        let config: Config = toml::from_str(
            r#"
            [topics]
            request = "req"
            response = "resp"
        "#,
        )
        .unwrap();

        let store = config.store();
        assert_eq!(store.reserved_channels, vec!["req", "resp"]);
        assert_eq!(config.service().request_topic, "req");
        assert_eq!(config.broker().response_topic, "resp");
    }
}
