//! Node configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via NETTABLES_CONFIG)
//! 3. Environment variables

use nettables_core::Role;
use nettables_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Timing configuration.
    pub timing: TimingConfig,
}

impl NodeConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("NETTABLES_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: NodeConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.timing.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()
    }
}

/// Which side of the protocol this node plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Server,
    Client,
}

impl From<NodeRole> for Role {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Server => Role::Server,
            NodeRole::Client => Role::Client,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub role: NodeRole,
    /// Address a server listens on.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Address a client connects to.
    #[serde(with = "socket_addr_serde")]
    pub server_addr: SocketAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Server,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(role) = std::env::var("NETTABLES_ROLE") {
            match role.to_lowercase().as_str() {
                "server" => self.role = NodeRole::Server,
                "client" => self.role = NodeRole::Client,
                other => tracing::warn!("Ignoring unknown NETTABLES_ROLE '{}'", other),
            }
        }

        if let Ok(addr) = std::env::var("NETTABLES_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("NETTABLES_SERVER") {
            if let Ok(parsed) = addr.parse() {
                self.server_addr = parsed;
            }
        }
    }
}

/// Timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long the writer waits for more outbound messages before idling.
    pub write_delay_ms: u64,
    /// How long an activated connection may stay silent before it is closed.
    pub watchdog_ms: u64,
    /// Socket read buffer size in bytes.
    pub read_buffer: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            write_delay_ms: 100,
            watchdog_ms: 1000,
            read_buffer: 8192,
        }
    }
}

impl TimingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(delay) = std::env::var("NETTABLES_WRITE_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.write_delay_ms = ms;
            }
        }

        if let Ok(watchdog) = std::env::var("NETTABLES_WATCHDOG_MS") {
            if let Ok(ms) = watchdog.parse() {
                self.watchdog_ms = ms;
            }
        }
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "write_delay_ms must be greater than zero".to_string(),
            ));
        }
        // Two idle write delays produce a ping; the peer's watchdog has to
        // outlast that or an idle link is torn down.
        if self.watchdog_ms <= self.write_delay_ms * 2 {
            return Err(ConfigError::ValidationError(format!(
                "watchdog_ms ({}) must exceed twice write_delay_ms ({})",
                self.watchdog_ms, self.write_delay_ms
            )));
        }
        if self.read_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "read_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
