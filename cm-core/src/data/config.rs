//! Driver configuration
//!
//! Stored as JSON. Lookup order: `$CHIPMON_CONFIG`, the per-user config
//! directory, then `/etc/chipmon/config.json`. A missing file yields the
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{isa, limits, paths, smbus};
use crate::error::{ChipmonError, Result};

use super::validation::validate_config;

/// Tunables for probing and caching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Registry capacity
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,
    /// Cache lifetime in milliseconds
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    /// ISA base addresses to scan
    #[serde(default = "default_isa_addresses")]
    pub isa_addresses: Vec<u16>,
    #[serde(default = "default_smbus_first")]
    pub smbus_first_address: u8,
    #[serde(default = "default_smbus_last")]
    pub smbus_last_address: u8,
    /// Program default limits and start monitoring on attach
    #[serde(default = "default_true")]
    pub init_chip: bool,
    /// Character device used for port I/O
    #[serde(default = "default_port_device")]
    pub port_device: PathBuf,
    /// SMBus adapters to scan, e.g. `/dev/i2c-0`
    #[serde(default)]
    pub i2c_buses: Vec<PathBuf>,
}

fn default_max_devices() -> usize {
    limits::DEFAULT_MAX_DEVICES
}

fn default_staleness_ms() -> u64 {
    limits::DEFAULT_STALENESS_MS
}

fn default_isa_addresses() -> Vec<u16> {
    isa::DEFAULT_ADDRESSES.to_vec()
}

fn default_smbus_first() -> u8 {
    smbus::FIRST_ADDRESS
}

fn default_smbus_last() -> u8 {
    smbus::LAST_ADDRESS
}

fn default_true() -> bool {
    true
}

fn default_port_device() -> PathBuf {
    PathBuf::from(paths::PORT_DEVICE)
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_devices: default_max_devices(),
            staleness_ms: default_staleness_ms(),
            isa_addresses: default_isa_addresses(),
            smbus_first_address: default_smbus_first(),
            smbus_last_address: default_smbus_last(),
            init_chip: true,
            port_device: default_port_device(),
            i2c_buses: Vec::new(),
        }
    }
}

impl DriverConfig {
    /// SMBus addresses covered by the configured scan range
    pub fn smbus_addresses(&self) -> impl Iterator<Item = u8> {
        self.smbus_first_address..=self.smbus_last_address
    }
}

/// Resolve the configuration file path
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(paths::CONFIG_ENV) {
        return PathBuf::from(path);
    }
    if let Some(dir) = dirs::config_dir() {
        let user = dir.join("chipmon").join(paths::CONFIG_FILE);
        if user.exists() {
            return user;
        }
    }
    Path::new(paths::CONFIG_DIR).join(paths::CONFIG_FILE)
}

/// Load the configuration from the default location
pub fn load_config() -> Result<DriverConfig> {
    load_config_from(&config_path())
}

/// Load and validate a configuration file; missing files give defaults
pub fn load_config_from(path: &Path) -> Result<DriverConfig> {
    if !path.exists() {
        debug!("No config at {:?}, using defaults", path);
        return Ok(DriverConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ChipmonError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config: DriverConfig = serde_json::from_str(&content)?;
    validate_config(&config)?;

    info!(path = %path.display(), max_devices = config.max_devices, "Loaded driver config");
    Ok(config)
}

/// Write a configuration file, creating the parent directory
pub fn save_config(path: &Path, config: &DriverConfig) -> Result<()> {
    validate_config(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ChipmonError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).map_err(|source| ChipmonError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}
