//! Observability component configuration
//!
//! Configuration for pressure sampling, tier thresholds, session files,
//! correlation retention, the overhead guard and human-readable output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default rotation cap for a single session segment (100 MiB)
pub const DEFAULT_ROTATION_BYTES: u64 = 100 * 1024 * 1024;

/// Observability component configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveConfig {
    /// Root log directory; session files live under `<root>/sessions/`
    pub root_dir: PathBuf,
    pub pressure: PressureConfig,
    pub session: SessionConfig,
    pub correlation: CorrelationConfig,
    pub guard: GuardConfig,
    pub output: OutputConfig,
}

/// Where memory readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureSource {
    /// Used vs. total system memory
    System,
    /// Resident set size of this process vs. total system memory
    Process,
}

impl std::str::FromStr for PressureSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(PressureSource::System),
            "process" => Ok(PressureSource::Process),
            other => Err(format!("unknown pressure source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    pub source: PressureSource,
    pub sample_interval_ms: u64,
    /// Ascending thresholds for Elevated, Severe and Critical
    pub thresholds: [f64; 3],
    /// Margin below a threshold required before descending
    pub hysteresis: f64,
    /// Consecutive samples below `threshold - hysteresis` before one step down
    pub descent_dwell_samples: u32,
    /// Minimum spacing between "monitor unavailable" warnings
    pub warning_interval_ms: u64,
}

/// Batching parameters for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBatch {
    pub max_batch: usize,
    pub flush_interval_ms: u64,
}

impl TierBatch {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Batch configuration per tier, indexed Normal..Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBatchTable {
    pub normal: TierBatch,
    pub elevated: TierBatch,
    pub severe: TierBatch,
    pub critical: TierBatch,
}

impl TierBatchTable {
    /// Look up the batch configuration for a tier level (0..=3)
    pub fn for_level(&self, level: u8) -> TierBatch {
        match level {
            0 => self.normal,
            1 => self.elevated,
            2 => self.severe,
            _ => self.critical,
        }
    }

    fn all(&self) -> [(&'static str, TierBatch); 4] {
        [
            ("normal", self.normal),
            ("elevated", self.elevated),
            ("severe", self.severe),
            ("critical", self.critical),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub rotation_bytes: u64,
    /// Records queued per session before newest records are shed
    pub max_queue_depth: usize,
    pub shutdown_timeout_ms: u64,
    pub tiers: TierBatchTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Allowed fraction of wall time spent inside the logging layer
    pub overhead_budget: f64,
    /// Samples kept in the moving window
    pub window: usize,
    /// Window samples required before the budget is evaluated
    pub min_samples: usize,
    /// Window span required before the budget is evaluated
    pub min_elapsed_ms: u64,
}

/// Color policy for human-readable lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl std::str::FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorMode::Auto),
            "always" => Ok(ColorMode::Always),
            "never" => Ok(ColorMode::Never),
            other => Err(format!("unknown color mode: {other}")),
        }
    }
}

/// Stream that carries human-readable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumanStream {
    Stdout,
    /// Used when stdout is reserved for protocol traffic
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub color: ColorMode,
    pub human_stream: HumanStream,
    pub correlation_suffix_len: usize,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            pressure: PressureConfig::default(),
            session: SessionConfig::default(),
            correlation: CorrelationConfig::default(),
            guard: GuardConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            source: PressureSource::System,
            sample_interval_ms: 1000,
            thresholds: [0.95, 0.99, 0.995],
            hysteresis: 0.02,
            descent_dwell_samples: 5,
            warning_interval_ms: 60_000,
        }
    }
}

impl Default for TierBatchTable {
    fn default() -> Self {
        Self {
            normal: TierBatch {
                max_batch: 256,
                flush_interval_ms: 100,
            },
            elevated: TierBatch {
                max_batch: 512,
                flush_interval_ms: 250,
            },
            severe: TierBatch {
                max_batch: 1024,
                flush_interval_ms: 1000,
            },
            critical: TierBatch {
                max_batch: 1024,
                flush_interval_ms: 1000,
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rotation_bytes: DEFAULT_ROTATION_BYTES,
            max_queue_depth: 10_000,
            shutdown_timeout_ms: 2000,
            tiers: TierBatchTable::default(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            overhead_budget: 0.05,
            window: 256,
            min_samples: 32,
            min_elapsed_ms: 250,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            color: ColorMode::Auto,
            human_stream: HumanStream::Stdout,
            correlation_suffix_len: 8,
        }
    }
}

fn default_root_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("conductor"))
        .unwrap_or_else(|| PathBuf::from(".conductor"))
}

impl ObserveConfig {
    /// Directory holding per-command session folders
    pub fn sessions_dir(&self) -> PathBuf {
        self.root_dir.join("sessions")
    }

    /// Check ranges and orderings that the runtime relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = self.pressure.thresholds;
        for (i, value) in thresholds.iter().enumerate() {
            if !(*value > 0.0 && *value <= 1.0) {
                return Err(ConfigError::invalid(
                    format!("pressure.thresholds[{i}]"),
                    format!("{value} is outside (0, 1]"),
                ));
            }
        }
        if !(thresholds[0] < thresholds[1] && thresholds[1] < thresholds[2]) {
            return Err(ConfigError::invalid(
                "pressure.thresholds",
                "thresholds must be strictly ascending",
            ));
        }
        if !(0.0..0.5).contains(&self.pressure.hysteresis) {
            return Err(ConfigError::invalid(
                "pressure.hysteresis",
                format!("{} is outside [0, 0.5)", self.pressure.hysteresis),
            ));
        }
        if self.pressure.descent_dwell_samples == 0 {
            return Err(ConfigError::invalid(
                "pressure.descent_dwell_samples",
                "must be >= 1",
            ));
        }
        if self.pressure.sample_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "pressure.sample_interval_ms",
                "must be >= 1",
            ));
        }
        for (name, batch) in self.session.tiers.all() {
            if batch.max_batch == 0 {
                return Err(ConfigError::invalid(
                    format!("session.tiers.{name}.max_batch"),
                    "must be >= 1",
                ));
            }
            if batch.flush_interval_ms == 0 {
                return Err(ConfigError::invalid(
                    format!("session.tiers.{name}.flush_interval_ms"),
                    "must be >= 1",
                ));
            }
        }
        if self.session.max_queue_depth == 0 {
            return Err(ConfigError::invalid("session.max_queue_depth", "must be >= 1"));
        }
        if self.session.rotation_bytes == 0 {
            return Err(ConfigError::invalid("session.rotation_bytes", "must be >= 1"));
        }
        let budget = self.guard.overhead_budget;
        if !(budget > 0.0 && budget <= 1.0) {
            return Err(ConfigError::invalid(
                "guard.overhead_budget",
                format!("{budget} is outside (0, 1]"),
            ));
        }
        if self.guard.window == 0 {
            return Err(ConfigError::invalid("guard.window", "must be >= 1"));
        }
        Ok(())
    }
}
