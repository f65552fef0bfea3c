//! Bridge configuration management
//!
//! One TOML file configures both halves of the bridge: poll intervals for the
//! compute worker and the transfer event loop, the device filters handed to
//! the host when requesting a device, and the accelerator delegate options.
//! Every field has a default, so an empty file is a valid configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub accelerator: AcceleratorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Compute worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// How long the worker waits for a command before polling again
    #[serde(default = "WorkerSettings::default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: Self::default_poll_timeout_ms(),
        }
    }
}

impl WorkerSettings {
    fn default_poll_timeout_ms() -> u64 {
        250
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Device access emulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Per-item wait while draining completed transfers
    #[serde(default = "UsbSettings::default_event_poll_timeout_ms")]
    pub event_poll_timeout_ms: u64,
    /// Device filters in `VID:PID` form, `*` matches any id
    #[serde(default = "UsbSettings::default_filters")]
    pub filters: Vec<String>,
    /// Bus number reported for the emulated device
    #[serde(default)]
    pub bus_number: u8,
    /// Port number reported for the emulated device
    #[serde(default = "UsbSettings::default_port_number")]
    pub port_number: u8,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            event_poll_timeout_ms: Self::default_event_poll_timeout_ms(),
            filters: Self::default_filters(),
            bus_number: 0,
            port_number: Self::default_port_number(),
        }
    }
}

impl UsbSettings {
    fn default_event_poll_timeout_ms() -> u64 {
        25
    }

    fn default_filters() -> Vec<String> {
        vec!["18d1:9302".to_string()]
    }

    fn default_port_number() -> u8 {
        1
    }

    pub fn event_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.event_poll_timeout_ms)
    }

    /// Parse the configured filter strings
    pub fn device_filters(&self) -> Result<Vec<DeviceFilter>> {
        self.filters.iter().map(|f| f.parse()).collect()
    }
}

/// Accelerator delegate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorSettings {
    /// Verbosity passed to the accelerator runtime
    #[serde(default)]
    pub verbosity: i32,
    /// Key/value options passed when creating the delegate
    #[serde(default = "AcceleratorSettings::default_options")]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub interface: u8,
    #[serde(default = "AcceleratorSettings::default_out_endpoint")]
    pub out_endpoint: u8,
    #[serde(default = "AcceleratorSettings::default_in_endpoint")]
    pub in_endpoint: u8,
    /// Upper bound on a single offloaded invocation
    #[serde(default = "AcceleratorSettings::default_invoke_timeout_ms")]
    pub invoke_timeout_ms: u64,
}

impl Default for AcceleratorSettings {
    fn default() -> Self {
        Self {
            verbosity: 0,
            options: Self::default_options(),
            interface: 0,
            out_endpoint: Self::default_out_endpoint(),
            in_endpoint: Self::default_in_endpoint(),
            invoke_timeout_ms: Self::default_invoke_timeout_ms(),
        }
    }
}

impl AcceleratorSettings {
    fn default_options() -> BTreeMap<String, String> {
        BTreeMap::from([("Usb.AlwaysDfu".to_string(), "False".to_string())])
    }

    fn default_out_endpoint() -> u8 {
        0x01
    }

    fn default_in_endpoint() -> u8 {
        0x81
    }

    fn default_invoke_timeout_ms() -> u64 {
        5000
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}

/// Vendor/product match rule used when requesting a device from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceFilter {
    /// `None` matches any vendor
    pub vendor_id: Option<u16>,
    /// `None` matches any product
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }

    fn parse_id(id: &str, name: &str, filter: &str) -> Result<Option<u16>> {
        if id == "*" {
            return Ok(None);
        }

        let hex = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .unwrap_or(id);
        if hex.is_empty() || hex.len() > 4 {
            return Err(Error::Config(format!(
                "Invalid {} in filter '{}', expected 1-4 hex digits",
                name, filter
            )));
        }

        u16::from_str_radix(hex, 16).map(Some).map_err(|_| {
            Error::Config(format!(
                "Invalid {} in filter '{}', not a valid hex number",
                name, filter
            ))
        })
    }
}

impl FromStr for DeviceFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((vid, pid)) = s.trim().split_once(':') else {
            return Err(Error::Config(format!(
                "Invalid filter format '{}', expected VID:PID (e.g., '18d1:9302' or '18d1:*')",
                s
            )));
        };

        Ok(Self {
            vendor_id: Self::parse_id(vid, "VID", s)?,
            product_id: Self::parse_id(pid, "PID", s)?,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "{:04x}", v)?,
            None => write!(f, "*")?,
        }
        match self.product_id {
            Some(p) => write!(f, ":{:04x}", p),
            None => write!(f, ":*"),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(Error::Config(format!(
                        "No configuration file at {}",
                        default.display()
                    )));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)?;
        let config: BridgeConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("edge-bridge").join("config.toml")
        } else {
            PathBuf::from(".config/edge-bridge/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.worker.poll_timeout_ms == 0 {
            return Err(Error::Config(
                "worker.poll_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.usb.event_poll_timeout_ms == 0 {
            return Err(Error::Config(
                "usb.event_poll_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.usb.device_filters()?;

        let accel = &self.accelerator;
        if accel.out_endpoint & 0x80 != 0 {
            return Err(Error::Config(format!(
                "accelerator.out_endpoint {:#04x} has the IN direction bit set",
                accel.out_endpoint
            )));
        }
        if accel.in_endpoint & 0x80 == 0 {
            return Err(Error::Config(format!(
                "accelerator.in_endpoint {:#04x} is missing the IN direction bit",
                accel.in_endpoint
            )));
        }

        Ok(())
    }
}
