//! Memory pressure sampling
//!
//! [`MemoryPressureMonitor::sample`] turns one [`MemorySource`] reading into
//! a ratio in `[0, 1]`. It never fails: when the source is unavailable the
//! last known ratio is returned and the failure is reported through the
//! [`FailureLedger`], with follow-up diagnostics rate limited.

use conductor_config::{PressureConfig, PressureSource};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::{ObserveError, ObserveResult};
use crate::ledger::FailureLedger;
use crate::task::BackgroundTask;
use crate::tier::TierController;

/// One memory reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryReading {
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// Provider of memory readings
pub trait MemorySource: Send + Sync {
    fn read(&self) -> ObserveResult<MemoryReading>;

    fn name(&self) -> &'static str;
}

/// Used vs. total system memory
pub struct SystemMemory {
    sys: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SystemMemory {
    fn read(&self) -> ObserveResult<MemoryReading> {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(ObserveError::MonitorUnavailable(
                "system reported zero total memory".into(),
            ));
        }
        let available = sys.available_memory();
        let used = if available > 0 {
            total.saturating_sub(available)
        } else {
            sys.used_memory()
        };
        Ok(MemoryReading {
            used_bytes: used,
            total_bytes: total,
        })
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Resident set size of this process vs. total system memory
pub struct ProcessMemory {
    sys: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for ProcessMemory {
    fn read(&self) -> ObserveResult<MemoryReading> {
        let pid = self.pid.ok_or_else(|| {
            ObserveError::MonitorUnavailable("current process id unavailable".into())
        })?;

        let mut sys = self.sys.lock();
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let total = sys.total_memory();
        if total == 0 {
            return Err(ObserveError::MonitorUnavailable(
                "system reported zero total memory".into(),
            ));
        }
        let rss = sys
            .process(pid)
            .map(|process| process.memory())
            .ok_or_else(|| {
                ObserveError::MonitorUnavailable(format!("process {pid} not found"))
            })?;
        Ok(MemoryReading {
            used_bytes: rss,
            total_bytes: total,
        })
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Build the source selected in config
pub fn source_for(config: &PressureConfig) -> Arc<dyn MemorySource> {
    match config.source {
        PressureSource::System => Arc::new(SystemMemory::new()),
        PressureSource::Process => Arc::new(ProcessMemory::new()),
    }
}

pub struct MemoryPressureMonitor {
    source: Arc<dyn MemorySource>,
    ledger: Arc<FailureLedger>,
    /// f64 bits of the last good ratio
    last_ratio: AtomicU64,
    last_used: AtomicU64,
    failures: AtomicU64,
    warning_interval: Duration,
    last_warning: Mutex<Option<Instant>>,
}

impl MemoryPressureMonitor {
    pub fn new(
        source: Arc<dyn MemorySource>,
        ledger: Arc<FailureLedger>,
        warning_interval: Duration,
    ) -> Self {
        Self {
            source,
            ledger,
            last_ratio: AtomicU64::new(0f64.to_bits()),
            last_used: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            warning_interval,
            last_warning: Mutex::new(None),
        }
    }

    /// Take one reading; falls back to the last known ratio on failure
    pub fn sample(&self) -> f64 {
        match self.source.read() {
            Ok(reading) => {
                let ratio = reading.ratio();
                self.last_ratio.store(ratio.to_bits(), Ordering::Release);
                self.last_used.store(reading.used_bytes, Ordering::Release);
                ratio
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.report(&err);
                self.last_ratio()
            }
        }
    }

    fn report(&self, err: &ObserveError) {
        if self.ledger.record(err) {
            *self.last_warning.lock() = Some(Instant::now());
            return;
        }
        let mut last = self.last_warning.lock();
        let due = last.map_or(true, |at| at.elapsed() >= self.warning_interval);
        if due {
            *last = Some(Instant::now());
            warn!(
                source = self.source.name(),
                failures = self.failures.load(Ordering::Relaxed),
                error = %err,
                "memory sampling still failing"
            );
        }
    }

    pub fn last_ratio(&self) -> f64 {
        f64::from_bits(self.last_ratio.load(Ordering::Acquire))
    }

    /// Used bytes from the last good reading
    pub fn last_used_bytes(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Sample on `period` and feed every ratio to `controller`
    pub fn spawn_sampler(
        self: &Arc<Self>,
        period: Duration,
        controller: Arc<TierController>,
    ) -> BackgroundTask {
        debug!(
            source = self.source.name(),
            period_ms = period.as_millis() as u64,
            "starting memory sampler"
        );
        let monitor = Arc::clone(self);
        BackgroundTask::spawn_periodic("memory-sampler", period, move || {
            let ratio = monitor.sample();
            controller.observe(ratio);
            std::future::ready(())
        })
    }
}

impl std::fmt::Debug for MemoryPressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressureMonitor")
            .field("source", &self.source.name())
            .field("last_ratio", &self.last_ratio())
            .field("failures", &self.failures())
            .finish()
    }
}
