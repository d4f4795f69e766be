use super::logging::LoggingConfig;
use super::types::LogLevel;
use gpumon_telemetry::TelemetryConfig;
use gpumon_types::{GpumonError, GpumonResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ENV_COLLECTOR: &str = "GPUMON_COLLECTOR";
pub const ENV_INTERVAL_MS: &str = "GPUMON_INTERVAL_MS";
pub const ENV_LOG_LEVEL: &str = "GPUMON_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "GPUMON_LOG_JSON";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// `<config dir>/gpumon/config.toml`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("gpumon"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Reads `path` (defaults when missing), applies environment overrides
    /// and validates.
    pub fn load(path: impl AsRef<Path>) -> GpumonResult<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` as written, without environment overrides or validation.
    pub fn read(path: impl AsRef<Path>) -> GpumonResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| GpumonError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> GpumonResult<Self> {
        toml::from_str(contents)
            .map_err(|e| GpumonError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn to_toml(&self) -> GpumonResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GpumonError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> GpumonResult<()> {
        let contents = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GpumonError::Config(format!("Failed to create config dir: {}", e))
                })?;
            }
        }

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| GpumonError::Config(format!("Failed to write config: {}", e)))?;

        info!("Configuration saved to {:?}", path.as_ref());
        Ok(())
    }

    pub fn validate(&self) -> GpumonResult<()> {
        self.telemetry.validate()
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(collector) = lookup(ENV_COLLECTOR) {
            let mut parts = collector.split_whitespace().map(str::to_string);
            if let Some(command) = parts.next() {
                self.telemetry.collector_command = PathBuf::from(command);
                self.telemetry.collector_args = parts.collect();
            }
        }

        if let Some(interval) = lookup(ENV_INTERVAL_MS) {
            match interval.trim().parse() {
                Ok(ms) => self.telemetry.default_interval_ms = ms,
                Err(_) => warn!("Ignoring {}={}: not a number", ENV_INTERVAL_MS, interval),
            }
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            match level.parse::<LogLevel>() {
                Ok(level) => self.logging.level = level,
                Err(e) => warn!("Ignoring {}: {}", ENV_LOG_LEVEL, e),
            }
        }

        if lookup(ENV_LOG_JSON).is_some() {
            self.logging.json = true;
        }
    }
}
