//! Configuration module
//!
//! Handles loading and saving station configuration.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig as TransportConfig;
use crate::protocol::{BROADCAST_CHANNEL, DEFAULT_PORT};
use crate::station::StationRole;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Station behaviour
    #[serde(default)]
    pub station: StationConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Unique station identifier (auto-generated if not set)
    pub station_id: Option<String>,
    /// Human-readable name for this station
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            station_id: None,
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "station".to_string()),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port shared by all stations
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<Ipv4Addr>,
    /// Broadcast destination (default: limited broadcast)
    pub broadcast_address: Option<Ipv4Addr>,
    /// Radio channel shared by all stations
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Heartbeat interval in ms (0 disables)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Depth of the receive queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_channel() -> u8 {
    BROADCAST_CHANNEL
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            broadcast_address: None,
            channel: default_channel(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Station configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Role this station plays
    pub role: Option<StationRole>,
    /// Silence (ms) after which the station shows its state as stale
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
    /// Ignore exact re-deliveries of the last message per type
    #[serde(default = "default_true")]
    pub drop_duplicates: bool,
    /// How many times the reset button broadcasts
    #[serde(default = "default_reset_repeats")]
    pub reset_repeats: u32,
    /// Gap between repeated broadcasts in ms
    #[serde(default = "default_repeat_gap")]
    pub repeat_gap_ms: u64,
    /// How long a menu order waits for its confirmation before it can be retried
    #[serde(default = "default_order_timeout")]
    pub order_timeout_ms: u64,
}

fn default_stale_after() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_reset_repeats() -> u32 {
    3
}

fn default_repeat_gap() -> u64 {
    100
}

fn default_order_timeout() -> u64 {
    1000
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            role: None,
            stale_after_ms: default_stale_after(),
            drop_duplicates: default_true(),
            reset_repeats: default_reset_repeats(),
            repeat_gap_ms: default_repeat_gap(),
            order_timeout_ms: default_order_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("showcase/config.toml")),
            Some(PathBuf::from("./showcase.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the station ID, generating one if not set
    pub fn station_id(&self) -> String {
        self.general
            .station_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Transport settings derived from the network section
    pub fn transport(&self) -> TransportConfig {
        let defaults = TransportConfig::new(self.network.port);
        TransportConfig {
            bind_address: self.network.bind_address.unwrap_or(defaults.bind_address),
            broadcast_address: self
                .network
                .broadcast_address
                .unwrap_or(defaults.broadcast_address),
            ..defaults
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            station_id: Some("wallet-stickc-01".to_string()),
            name: "Visitor Wallet".to_string(),
            verbose: false,
        },
        network: NetworkConfig {
            broadcast_address: Some(Ipv4Addr::new(192, 168, 4, 255)),
            ..Default::default()
        },
        station: StationConfig {
            role: Some(StationRole::Wallet),
            ..Default::default()
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}
