//! Relay configuration
//!
//! Loaded from TOML. Every field has a default so an empty file (or no file at
//! all) yields a working LAN relay on port 3000.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main relay configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub cloud: CloudSection,
}

/// Client-facing HTTP/WebSocket server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Address the server binds to
    pub bind_addr: IpAddr,
    /// Port for the WebSocket endpoint, `/health` and `/metrics`
    pub port: u16,
    /// Outbound events buffered per client before new ones are dropped
    pub client_queue_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
            client_queue_capacity: 64,
        }
    }
}

impl ServerSection {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Printer broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSection {
    /// Broker port on the printer (LAN mode)
    pub broker_port: u16,
    /// Username for LAN broker sessions
    pub username: String,
    pub keep_alive_secs: u64,
    /// Use TLS for LAN broker connections
    pub tls: bool,
    /// Verify the LAN broker certificate; printers present self-signed certificates
    pub verify_certificates: bool,
    /// Pause between reconnection attempts
    pub reconnect_delay_ms: u64,
    /// Largest report payload accepted from the broker, in bytes
    pub max_packet_size: usize,
    /// Capacity of the broker client's request queue
    pub request_capacity: usize,
    /// Capacity of the link-to-classifier event queue
    pub event_capacity: usize,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            broker_port: 8883,
            username: "bblp".to_string(),
            keep_alive_secs: 60,
            tls: true,
            verify_certificates: false,
            reconnect_delay_ms: 1000,
            max_packet_size: 256 * 1024,
            request_capacity: 10,
            event_capacity: 256,
        }
    }
}

impl DeviceSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Cloud account and firmware manifest collaborators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudSection {
    /// Published firmware manifest (JSON array indexed by device family)
    pub manifest_url: String,
    /// Timeout for every collaborator request
    pub timeout_ms: u64,
    /// Global account region (e-mail sign-in)
    pub com: RegionSection,
    /// China account region (phone number sign-in)
    pub cn: RegionSection,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            manifest_url:
                "https://raw.githubusercontent.com/lunDreame/lundreame.github.io/main/assets/upgrade.json"
                    .to_string(),
            timeout_ms: 10_000,
            com: RegionSection {
                api_base: "https://bambulab.com".to_string(),
                broker_host: "us.mqtt.bambulab.com".to_string(),
            },
            cn: RegionSection {
                api_base: "https://bambulab.cn".to_string(),
                broker_host: "cn.mqtt.bambulab.com".to_string(),
            },
        }
    }
}

impl CloudSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Endpoints for one account region
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionSection {
    /// Base URL of the account web API
    pub api_base: String,
    /// Cloud broker that relays device topics for this region; always TLS with verification
    pub broker_host: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be non-zero".to_string(),
            ));
        }
        if self.server.client_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.client_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.device.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "device.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.device.request_capacity == 0 || self.device.event_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "device queue capacities must be at least 1".to_string(),
            ));
        }
        validate_url("cloud.manifest_url", &self.cloud.manifest_url)?;
        validate_url("cloud.com.api_base", &self.cloud.com.api_base)?;
        validate_url("cloud.cn.api_base", &self.cloud.cn.api_base)?;
        Ok(())
    }
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidConfig(format!("{name} '{value}' is not a URL: {e}")))
}
