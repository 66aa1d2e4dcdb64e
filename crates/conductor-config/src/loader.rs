//! Configuration loading
//!
//! Precedence: defaults < config file < environment. A missing default
//! config file is not an error; an explicitly requested one is.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::components::ObserveConfig;
use crate::error::ConfigError;

/// Environment variables recognised by [`ConfigLoader`]
pub mod env_keys {
    pub const LOG_DIR: &str = "CONDUCTOR_LOG_DIR";
    pub const ROTATION_BYTES: &str = "CONDUCTOR_ROTATION_BYTES";
    pub const PRESSURE_THRESHOLDS: &str = "CONDUCTOR_PRESSURE_THRESHOLDS";
    pub const HYSTERESIS: &str = "CONDUCTOR_HYSTERESIS";
    pub const DESCENT_DWELL: &str = "CONDUCTOR_DESCENT_DWELL";
    pub const OVERHEAD_BUDGET: &str = "CONDUCTOR_OVERHEAD_BUDGET";
    pub const PRESSURE_SOURCE: &str = "CONDUCTOR_PRESSURE_SOURCE";
    pub const COLOR: &str = "CONDUCTOR_COLOR";
}

/// Default config file location (`~/.config/conductor/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("conductor").join("config.toml"))
}

/// Builder-style loader for [`ObserveConfig`]
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit config file; it must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Load using the process environment
    pub fn load(&self) -> Result<ObserveConfig, ConfigError> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Load using a custom environment lookup
    pub fn load_with_env<F>(&self, lookup: F) -> Result<ObserveConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.file {
            Some(path) => read_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => ObserveConfig::default(),
            },
        };

        apply_env(&mut config, lookup)?;
        config.validate()?;
        Ok(config)
    }
}

fn read_file(path: &Path) -> Result<ObserveConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn apply_env<F>(config: &mut ObserveConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(env_keys::LOG_DIR) {
        config.root_dir = PathBuf::from(dir);
    }
    if let Some(bytes) = lookup(env_keys::ROTATION_BYTES) {
        config.session.rotation_bytes = parse_env(env_keys::ROTATION_BYTES, &bytes)?;
    }
    if let Some(list) = lookup(env_keys::PRESSURE_THRESHOLDS) {
        config.pressure.thresholds = parse_thresholds(&list)?;
    }
    if let Some(value) = lookup(env_keys::HYSTERESIS) {
        config.pressure.hysteresis = parse_env(env_keys::HYSTERESIS, &value)?;
    }
    if let Some(value) = lookup(env_keys::DESCENT_DWELL) {
        config.pressure.descent_dwell_samples = parse_env(env_keys::DESCENT_DWELL, &value)?;
    }
    if let Some(value) = lookup(env_keys::OVERHEAD_BUDGET) {
        config.guard.overhead_budget = parse_env(env_keys::OVERHEAD_BUDGET, &value)?;
    }
    if let Some(value) = lookup(env_keys::PRESSURE_SOURCE) {
        config.pressure.source = value
            .parse()
            .map_err(|reason: String| ConfigError::invalid(env_keys::PRESSURE_SOURCE, reason))?;
    }
    if let Some(value) = lookup(env_keys::COLOR) {
        config.output.color = value
            .parse()
            .map_err(|reason: String| ConfigError::invalid(env_keys::COLOR, reason))?;
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("{value:?}: {e}")))
}

fn parse_thresholds(list: &str) -> Result<[f64; 3], ConfigError> {
    let values = list
        .split(',')
        .map(|part| parse_env::<f64>(env_keys::PRESSURE_THRESHOLDS, part))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(ConfigError::invalid(
            env_keys::PRESSURE_THRESHOLDS,
            format!("expected three comma-separated values, got {}", values.len()),
        )),
    }
}
