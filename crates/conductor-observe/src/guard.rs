//! Self-measurement of the logging layer
//!
//! Every facade call is timed into a bounded moving window. The overhead
//! ratio is the time spent inside the layer across the window divided by
//! the wall time the window spans, from the start of its oldest sample to
//! now. When that ratio exceeds `overhead_budget` the guard asks the tier
//! controller to escalate one tier and clears the window, so the next
//! decision only sees calls made under the new tier. Memory deltas come
//! from the monitor's most recent reading, so they are coarse and often
//! zero.

use conductor_config::GuardConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::monitor::MemoryPressureMonitor;
use crate::tier::{TierController, TierTransition, TierTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceSample {
    pub operation: &'static str,
    pub duration: Duration,
    pub memory_delta: i64,
}

/// Aggregate over the moving window
#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    pub samples: usize,
    pub mean_duration_us: u64,
    pub max_duration_us: u64,
    pub mean_memory_delta: i64,
    /// Overhead fraction across the window
    pub overhead_ratio: f64,
    pub escalations: u64,
}

/// A sample and the instant it finished
struct Timed {
    sample: PerformanceSample,
    finished: Instant,
}

impl Timed {
    fn started(&self) -> Instant {
        self.finished
            .checked_sub(self.sample.duration)
            .unwrap_or(self.finished)
    }
}

#[derive(Default)]
struct Window {
    samples: VecDeque<Timed>,
    total: Duration,
    total_memory_delta: i64,
}

impl Window {
    fn push(&mut self, timed: Timed, capacity: usize) {
        self.total += timed.sample.duration;
        self.total_memory_delta += timed.sample.memory_delta;
        self.samples.push_back(timed);
        while self.samples.len() > capacity.max(1) {
            if let Some(old) = self.samples.pop_front() {
                self.total = self.total.saturating_sub(old.sample.duration);
                self.total_memory_delta -= old.sample.memory_delta;
            }
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.total = Duration::ZERO;
        self.total_memory_delta = 0;
    }

    /// Wall time from the start of the oldest sample to `now`
    fn span(&self, now: Instant) -> Duration {
        self.samples
            .front()
            .map_or(Duration::ZERO, |oldest| now.saturating_duration_since(oldest.started()))
    }

    fn overhead_ratio(&self, now: Instant) -> f64 {
        let span = self.span(now);
        if span.is_zero() {
            return 0.0;
        }
        (self.total.as_secs_f64() / span.as_secs_f64()).min(1.0)
    }
}

pub struct PerformanceGuard {
    window: Mutex<Window>,
    config: GuardConfig,
    monitor: Option<Arc<MemoryPressureMonitor>>,
    controller: Arc<TierController>,
    escalations: AtomicU64,
}

impl PerformanceGuard {
    pub fn new(
        config: GuardConfig,
        controller: Arc<TierController>,
        monitor: Option<Arc<MemoryPressureMonitor>>,
    ) -> Self {
        Self {
            window: Mutex::new(Window {
                samples: VecDeque::with_capacity(config.window.min(1024)),
                ..Window::default()
            }),
            config,
            monitor,
            controller,
            escalations: AtomicU64::new(0),
        }
    }

    /// Start measuring against a new command
    pub fn begin_command(&self) {
        self.window.lock().clear();
    }

    /// Run `f`, recording its duration and memory delta
    pub fn measure<T>(&self, operation: &'static str, f: impl FnOnce() -> T) -> T {
        let before = self.memory_used();
        let started = Instant::now();
        let out = f();
        let duration = started.elapsed();
        let memory_delta = self.memory_used() as i64 - before as i64;
        self.record(PerformanceSample {
            operation,
            duration,
            memory_delta,
        });
        out
    }

    pub fn record(&self, sample: PerformanceSample) -> Option<TierTransition> {
        self.record_at(sample, Instant::now())
    }

    /// Record a sample that finished at `now`
    pub(crate) fn record_at(&self, sample: PerformanceSample, now: Instant) -> Option<TierTransition> {
        let over_budget = {
            let mut window = self.window.lock();
            window.push(
                Timed {
                    sample,
                    finished: now,
                },
                self.config.window,
            );

            // Warm-up gates before the ratio means anything
            let warm = window.samples.len() >= self.config.min_samples
                && window.span(now) >= Duration::from_millis(self.config.min_elapsed_ms);
            let ratio = window.overhead_ratio(now);
            if warm && ratio > self.config.overhead_budget {
                window.clear();
                Some(ratio)
            } else {
                None
            }
        };

        let ratio = over_budget?;
        self.escalations.fetch_add(1, Ordering::Relaxed);
        warn!(
            overhead = ratio,
            budget = self.config.overhead_budget,
            operation = sample.operation,
            "logging overhead over budget, requesting escalation"
        );
        self.controller.request_escalation(TierTrigger::Overhead)
    }

    pub fn stats(&self) -> GuardStats {
        let window = self.window.lock();
        let n = window.samples.len();
        let mean = if n == 0 {
            Duration::ZERO
        } else {
            window.total / n as u32
        };
        GuardStats {
            samples: n,
            mean_duration_us: mean.as_micros() as u64,
            max_duration_us: window
                .samples
                .iter()
                .map(|t| t.sample.duration.as_micros() as u64)
                .max()
                .unwrap_or(0),
            mean_memory_delta: if n == 0 {
                0
            } else {
                window.total_memory_delta / n as i64
            },
            overhead_ratio: window.overhead_ratio(Instant::now()),
            escalations: self.escalations.load(Ordering::Relaxed),
        }
    }

    fn memory_used(&self) -> u64 {
        self.monitor
            .as_ref()
            .map(|m| m.last_used_bytes())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for PerformanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceGuard")
            .field("config", &self.config)
            .field("escalations", &self.escalations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::{TierLevel, TierSettings};

    fn guard(config: GuardConfig) -> (PerformanceGuard, Arc<TierController>) {
        let controller = Arc::new(TierController::new(TierSettings::default()));
        (
            PerformanceGuard::new(config, Arc::clone(&controller), None),
            controller,
        )
    }

    fn sample(ms: u64) -> PerformanceSample {
        PerformanceSample {
            operation: "info",
            duration: Duration::from_millis(ms),
            memory_delta: 0,
        }
    }

    fn config() -> GuardConfig {
        GuardConfig {
            overhead_budget: 0.05,
            window: 8,
            min_samples: 4,
            min_elapsed_ms: 100,
        }
    }

    #[test]
    fn test_over_budget_escalates_and_clears_window() {
        let (guard, controller) = guard(config());
        let start = Instant::now();

        // 20ms every 50ms is about 47% of the span
        for i in 0..3 {
            assert!(guard.record_at(sample(20), start + Duration::from_millis(50 * i)).is_none());
        }
        let transition = guard
            .record_at(sample(20), start + Duration::from_millis(150))
            .unwrap();
        assert_eq!(transition.trigger, TierTrigger::Overhead);
        assert_eq!(controller.level(), TierLevel::Elevated);

        // Cleared window has to warm up again
        assert!(guard.record_at(sample(20), start + Duration::from_millis(200)).is_none());
        assert_eq!(guard.stats().samples, 1);
        assert_eq!(guard.stats().escalations, 1);
    }

    #[test]
    fn test_under_budget_never_escalates() {
        let (guard, controller) = guard(config());
        let start = Instant::now();
        for i in 0..100 {
            let at = start + Duration::from_millis(100 * i);
            assert!(guard.record_at(sample(1), at).is_none());
        }
        assert_eq!(controller.level(), TierLevel::Normal);
    }

    #[test]
    fn test_waits_for_minimum_elapsed() {
        let (guard, controller) = guard(config());
        let start = Instant::now();
        for i in 0..10 {
            guard.record_at(sample(5), start + Duration::from_millis(5 * i));
        }
        assert_eq!(controller.level(), TierLevel::Normal);
    }

    #[test]
    fn test_burst_after_long_quiet_escalates() {
        let (guard, controller) = guard(GuardConfig {
            window: 32,
            min_samples: 32,
            ..config()
        });
        let start = Instant::now();
        guard.begin_command();
        assert!(guard.record_at(sample(1), start).is_none());

        // An hour later, 32 calls of 20ms inside one second
        let burst = start + Duration::from_secs(3600);
        let mut transition = None;
        for i in 0..32 {
            transition = transition.or(guard.record_at(sample(20), burst + Duration::from_millis(31 * i)));
        }
        assert_eq!(transition.unwrap().trigger, TierTrigger::Overhead);
        assert_eq!(controller.level(), TierLevel::Elevated);
    }

    #[test]
    fn test_old_samples_roll_out_of_ratio() {
        let (guard, _) = guard(GuardConfig {
            window: 4,
            min_samples: usize::MAX,
            ..config()
        });
        let start = Instant::now();
        guard.record_at(sample(100), start);
        for i in 1..=4 {
            guard.record_at(sample(1), start + Duration::from_secs(i));
        }
        let window = guard.window.lock();
        assert_eq!(window.samples.len(), 4);
        assert_eq!(window.total, Duration::from_millis(4));
    }

    #[test]
    fn test_window_is_bounded() {
        let (guard, _) = guard(GuardConfig {
            window: 3,
            min_samples: usize::MAX,
            ..config()
        });
        for ms in [1, 2, 3, 4, 5] {
            guard.record(sample(ms));
        }
        let stats = guard.stats();
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.mean_duration_us, 4_000);
        assert_eq!(stats.max_duration_us, 5_000);
    }

    #[test]
    fn test_measure_returns_value() {
        let (guard, _) = guard(config());
        let value = guard.measure("compute", || 41 + 1);
        assert_eq!(value, 42);
        assert_eq!(guard.stats().samples, 1);
    }
}
