// =============================================================================
// CONFIGURATION - Load settings from fw_renderer.toml
// =============================================================================
//
// Defaults for everything the device descriptor leaves unspecified.
// The file is optional; a missing or broken file falls back to defaults.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "FW_RENDERER_CONFIG";

/// Config file looked up in the working directory when the variable is unset
pub const DEFAULT_CONFIG_FILE: &str = "fw_renderer.toml";

/// Staging buffers never go below this size
pub const MIN_STAGING_BYTES: u64 = 64 * 1024;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub staging: StagingConfig,
    pub logging: LoggingConfig,
}

/// Device creation defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub app_name: String,
    pub validation_layers: bool,
    pub vsync: bool,
    pub vertex_components: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "fw-renderer".to_string(),
            validation_layers: cfg!(debug_assertions),
            vsync: true,
            vertex_components: 3,
        }
    }
}

/// Staging (vertex) buffer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub capacity_bytes: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 1 << 20,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `$FW_RENDERER_CONFIG` or `fw_renderer.toml`.
    ///
    /// Runs before any logger exists, so problems come back as warnings for
    /// the caller to log once one is installed.
    pub fn load() -> (Self, Vec<String>) {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_reporting(&path)
    }

    /// Like `load_from_path`, falling back to defaults on any problem.
    pub fn load_reporting<P: AsRef<Path>>(path: P) -> (Self, Vec<String>) {
        let path = path.as_ref();
        let mut warnings = Vec::new();

        let config = Self::load_from_path(path).unwrap_or_else(|e| {
            warnings.push(format!("Failed to load {:?}: {:#}. Using defaults.", path, e));
            Config::default()
        });
        if config.parse_level().is_none() {
            warnings.push(format!(
                "Unknown log level '{}', defaulting to info",
                config.logging.level
            ));
        }

        (config, warnings)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Staging capacity with the 64 KiB floor applied
    pub fn staging_capacity(&self) -> u64 {
        self.staging.capacity_bytes.max(MIN_STAGING_BYTES)
    }

    /// Vertex component count, 3 unless the file asks for 2
    pub fn vertex_components(&self) -> u32 {
        match self.device.vertex_components {
            2 | 3 => self.device.vertex_components,
            other => {
                log::warn!("Unsupported vertex_components {}, defaulting to 3", other);
                3
            }
        }
    }

    /// Get log level as a `log` filter
    pub fn log_level(&self) -> LevelFilter {
        self.parse_level().unwrap_or(LevelFilter::Info)
    }

    fn parse_level(&self) -> Option<LevelFilter> {
        match self.logging.level.to_lowercase().as_str() {
            "off" => Some(LevelFilter::Off),
            "error" => Some(LevelFilter::Error),
            "warn" | "warning" => Some(LevelFilter::Warn),
            "info" => Some(LevelFilter::Info),
            "debug" => Some(LevelFilter::Debug),
            "trace" => Some(LevelFilter::Trace),
            _ => None,
        }
    }
}
