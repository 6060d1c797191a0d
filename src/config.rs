//! Session configuration
//!
//! Persisted as JSON in the platform config directory. Every field has a
//! default, so partial or older files still load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::plugin::default_search_paths;
use crate::error::{ConfigError, ConfigResult};

/// Sample rate requested from the devices and the processing unit
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Frames per block
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// Delay before scanning, so the "scanning" notice is visible first
pub const DEFAULT_SCAN_DELAY_MS: u64 = 2000;

/// Meter refresh period
pub const DEFAULT_METER_INTERVAL_MS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// Input device name, `None` for the system default
    pub input_device: Option<String>,
    /// Output device name, `None` for the system default
    pub output_device: Option<String>,
    /// Bundle tried before searching
    pub plugin_path: Option<PathBuf>,
    pub plugin_search_paths: Vec<PathBuf>,
    pub scan_delay_ms: u64,
    pub meter_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            input_device: None,
            output_device: None,
            plugin_path: None,
            plugin_search_paths: default_search_paths(),
            scan_delay_ms: DEFAULT_SCAN_DELAY_MS,
            meter_interval_ms: DEFAULT_METER_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// `<config dir>/MoodBoard/config.json`
    pub fn config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("MoodBoard").join("config.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> ConfigResult<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {:?}", path);
        Ok(config.sanitized())
    }

    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)?;
        log::debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Duration of one block at the configured rate
    pub fn block_period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms)
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms.max(1))
    }

    /// Replace values that cannot drive a stream with their defaults
    fn sanitized(mut self) -> Self {
        if self.sample_rate == 0 {
            log::warn!("Config sample_rate is 0, using {}", DEFAULT_SAMPLE_RATE);
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if self.block_size == 0 {
            log::warn!("Config block_size is 0, using {}", DEFAULT_BLOCK_SIZE);
            self.block_size = DEFAULT_BLOCK_SIZE;
        }
        self
    }
}
