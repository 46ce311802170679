//! Layered configuration: defaults, then TOML file, then environment.
//! CLI flags are applied last by `main`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_CLOCK_CORRECTION_HOURS: i64 = 3;
/// Corrections beyond a day in either direction are rejected.
pub const MAX_CLOCK_CORRECTION_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server log to tail. Required for `run`.
    pub log_path: Option<PathBuf>,
    pub database: PathBuf,
    pub poll_interval_ms: u64,
    /// Hours added to every parsed log time.
    pub clock_correction_hours: i64,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub capacity: usize,
    /// JSON-lines file for login notifications. Unset means log only.
    pub outbox: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: None,
            database: default_database_path(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            clock_correction_hours: DEFAULT_CLOCK_CORRECTION_HOURS,
            fanout: FanoutConfig::default(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            capacity: crate::fanout::DEFAULT_CAPACITY,
            outbox: None,
        }
    }
}

impl Config {
    /// Load from `explicit` (must exist) or the user config file (optional),
    /// then apply `MINETAIL_*` environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Error> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                Self::from_file(path)?
            }
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::ConfigParse(format!("failed to parse {}: {e}", path.display())))?;
        if !valid_correction(config.clock_correction_hours) {
            return Err(Error::ConfigParse(format!(
                "{}: clock_correction_hours must be within ±{MAX_CLOCK_CORRECTION_HOURS}, got {}",
                path.display(),
                config.clock_correction_hours
            )));
        }
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = get("MINETAIL_LOG_PATH") {
            self.log_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("MINETAIL_DB") {
            self.database = PathBuf::from(path);
        }
        if let Some(raw) = get("MINETAIL_POLL_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.poll_interval_ms = ms,
                _ => warn!(value = %raw, "Ignoring invalid MINETAIL_POLL_MS"),
            }
        }
        if let Some(raw) = get("MINETAIL_CLOCK_CORRECTION_HOURS") {
            match raw.parse::<i64>() {
                Ok(hours) if valid_correction(hours) => self.clock_correction_hours = hours,
                _ => warn!(value = %raw, "Ignoring invalid MINETAIL_CLOCK_CORRECTION_HOURS"),
            }
        }
        if let Some(path) = get("MINETAIL_OUTBOX") {
            self.fanout.outbox = Some(PathBuf::from(path));
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn clock_correction(&self) -> chrono::Duration {
        let hours = self
            .clock_correction_hours
            .clamp(-MAX_CLOCK_CORRECTION_HOURS, MAX_CLOCK_CORRECTION_HOURS);
        chrono::Duration::hours(hours)
    }
}

fn valid_correction(hours: i64) -> bool {
    (-MAX_CLOCK_CORRECTION_HOURS..=MAX_CLOCK_CORRECTION_HOURS).contains(&hours)
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("minetail").join("config.toml"))
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("minetail")
        .join("minetail.db")
}
