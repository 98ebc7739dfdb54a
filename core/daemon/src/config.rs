//! Runtime configuration loaded from `~/.sensor-sentry/config.toml`.
//!
//! Every section is optional; a missing file yields defaults.

use sensor_sentry_protocol::SensorKind;
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::ConfigError;

pub const DATA_DIR_NAME: &str = ".sensor-sentry";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SentryConfig {
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorsConfig {
    #[serde(default = "default_enabled_sensors")]
    pub enabled: Vec<SensorKind>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_sensors(),
        }
    }
}

fn default_enabled_sensors() -> Vec<SensorKind> {
    SensorKind::ALL.to_vec()
}

/// Reserved notification IDs, one per sensor kind.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default = "default_microphone_id")]
    pub microphone_id: u32,
    #[serde(default = "default_camera_id")]
    pub camera_id: u32,
}

impl NotificationsConfig {
    pub fn id_for(&self, sensor: SensorKind) -> u32 {
        match sensor {
            SensorKind::Microphone => self.microphone_id,
            SensorKind::Camera => self.camera_id,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            microphone_id: default_microphone_id(),
            camera_id: default_camera_id(),
        }
    }
}

fn default_microphone_id() -> u32 {
    68
}

fn default_camera_id() -> u32 {
    69
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Persist the open session on shutdown instead of discarding it.
    #[serde(default = "default_flush_on_stop")]
    pub flush_on_stop: bool,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            flush_on_stop: default_flush_on_stop(),
            db_path: None,
        }
    }
}

fn default_flush_on_stop() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Also write a daily rolling log under `~/.sensor-sentry/logs`.
    #[serde(default)]
    pub file: bool,
}

impl SentryConfig {
    /// Enabled sensors, deduplicated, in declaration order.
    pub fn enabled_sensors(&self) -> Vec<SensorKind> {
        let mut sensors = Vec::new();
        for sensor in &self.sensors.enabled {
            if !sensors.contains(sensor) {
                sensors.push(*sensor);
            }
        }
        sensors
    }
}

pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(DATA_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config(path: Option<PathBuf>) -> Result<SentryConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(SentryConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<SentryConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}
