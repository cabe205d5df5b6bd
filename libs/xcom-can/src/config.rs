//! Client configuration
//!
//! Sources, lowest to highest priority: built-in defaults, an optional
//! YAML/TOML/JSON file, then `XCOM_`-prefixed environment variables
//! (`XCOM_ADDRESS=2`, `XCOM_INTERFACE=vcan0`, ...).

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::addresses::Address;
use crate::error::{Result, XcomError};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "XCOM_";

/// Bitrates selectable with the Xcom-CAN dip-switches
pub const SUPPORTED_BITRATES: [u32; 8] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 1_000_000,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XcomConfig {
    /// Source address of this client on the bus
    #[serde(default = "default_address")]
    pub address: Address,

    /// CAN interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Bus speed in bit/s, must match the gateway dip-switches
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Response timeout used when a call passes none
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Receive loop poll interval
    #[serde(default = "default_rx_poll_interval_ms")]
    pub rx_poll_interval_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_address() -> Address {
    Address::default()
}

fn default_interface() -> String {
    "can0".to_string()
}

fn default_bitrate() -> u32 {
    250_000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_rx_poll_interval_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for XcomConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            interface: default_interface(),
            bitrate: default_bitrate(),
            default_timeout_ms: default_timeout_ms(),
            rx_poll_interval_ms: default_rx_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl XcomConfig {
    /// Load defaults, then `path` (if any), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(XcomConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(XcomError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| XcomError::config("Config file must have an extension"))?;
            figment = match extension {
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "json" => figment.merge(Json::file(path)),
                _ => {
                    return Err(XcomError::config(format!(
                        "Unsupported config file format: {extension}"
                    )))
                },
            };
        }

        let config: XcomConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| XcomError::config(format!("Failed to load configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(XcomError::config("Interface cannot be empty"));
        }
        if !SUPPORTED_BITRATES.contains(&self.bitrate) {
            return Err(XcomError::config(format!(
                "Unsupported bitrate {} (expected one of {SUPPORTED_BITRATES:?})",
                self.bitrate
            )));
        }
        if self.default_timeout_ms == 0 {
            return Err(XcomError::config("default_timeout_ms must be greater than zero"));
        }
        if self.rx_poll_interval_ms == 0 {
            return Err(XcomError::config("rx_poll_interval_ms must be greater than zero"));
        }
        EnvFilter::try_new(&self.log_level).map_err(|e| {
            XcomError::config(format!("Invalid log_level '{}': {e}", self.log_level))
        })?;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn rx_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rx_poll_interval_ms)
    }
}
