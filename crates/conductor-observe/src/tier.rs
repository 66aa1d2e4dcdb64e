//! Emergency tier state machine
//!
//! Pressure above a tier threshold escalates immediately, straight to the
//! highest tier whose threshold is met. Descent is one step at a time and
//! only after `descent_dwell` consecutive samples below
//! `threshold - hysteresis`. Critical never descends on its own; only
//! [`TierController::reset`] leaves it.
//!
//! The current [`EmergencyTier`] is replaced wholesale on every
//! transition. Observers registered with [`TierController::register`] are
//! invoked synchronously, in registration order, before the transition
//! call returns.

use chrono::{DateTime, Utc};
use conductor_config::{ObserveConfig, TierBatch, TierBatchTable};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HISTORY_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TierLevel {
    Normal = 0,
    Elevated = 1,
    Severe = 2,
    Critical = 3,
}

impl TierLevel {
    pub const ALL: [TierLevel; 4] = [
        TierLevel::Normal,
        TierLevel::Elevated,
        TierLevel::Severe,
        TierLevel::Critical,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            TierLevel::Normal => "normal",
            TierLevel::Elevated => "elevated",
            TierLevel::Severe => "severe",
            TierLevel::Critical => "critical",
        }
    }

    /// One tier up, saturating at Critical
    pub fn up(self) -> Self {
        Self::from_u8(self.as_u8() + 1).unwrap_or(TierLevel::Critical)
    }

    /// One tier down, saturating at Normal
    pub fn down(self) -> Self {
        Self::from_u8(self.as_u8().saturating_sub(1)).unwrap_or(TierLevel::Normal)
    }

    /// Time allowed between the triggering sample and full activation
    pub fn activation_budget(self) -> Duration {
        match self {
            TierLevel::Critical => Duration::from_millis(25),
            _ => Duration::from_millis(50),
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} ({})", self.as_u8(), self.name())
    }
}

/// Set of output features enabled by a tier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureSet(u8);

impl FeatureSet {
    pub const EMPTY: Self = Self(0);
    pub const BASIC_LOGGING: Self = Self(1 << 0);
    pub const SESSION_FILES: Self = Self(1 << 1);
    pub const CORRELATION: Self = Self(1 << 2);
    pub const MINIMAL_LOGGING: Self = Self(1 << 3);
    pub const STDOUT_ONLY: Self = Self(1 << 4);
    pub const CONSOLE_ONLY: Self = Self(1 << 5);

    const NAMES: [(FeatureSet, &'static str); 6] = [
        (Self::BASIC_LOGGING, "basic_logging"),
        (Self::SESSION_FILES, "session_files"),
        (Self::CORRELATION, "correlation"),
        (Self::MINIMAL_LOGGING, "minimal_logging"),
        (Self::STDOUT_ONLY, "stdout_only"),
        (Self::CONSOLE_ONLY, "console_only"),
    ];

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b11_1111)
    }

    pub fn for_level(level: TierLevel) -> Self {
        match level {
            TierLevel::Normal | TierLevel::Elevated => Self::BASIC_LOGGING
                .union(Self::SESSION_FILES)
                .union(Self::CORRELATION),
            TierLevel::Severe => Self::MINIMAL_LOGGING.union(Self::STDOUT_ONLY),
            TierLevel::Critical => Self::CONSOLE_ONLY,
        }
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierTrigger {
    Pressure,
    QueueOverflow,
    Overhead,
    Manual,
    /// Dwell satisfied below the hysteresis floor
    Recovery,
    Reset,
}

impl TierTrigger {
    pub fn label(self) -> &'static str {
        match self {
            TierTrigger::Pressure => "memory pressure",
            TierTrigger::QueueOverflow => "session queue overflow",
            TierTrigger::Overhead => "logging overhead",
            TierTrigger::Manual => "manual request",
            TierTrigger::Recovery => "pressure recovered",
            TierTrigger::Reset => "reset",
        }
    }
}

/// The active tier; never mutated after construction
#[derive(Debug, Clone)]
pub struct EmergencyTier {
    level: TierLevel,
    thresholds: [f64; 3],
    hysteresis: f64,
    features: FeatureSet,
    batch: TierBatch,
    entered_at: DateTime<Utc>,
}

impl EmergencyTier {
    fn new(level: TierLevel, settings: &TierSettings) -> Self {
        Self {
            level,
            thresholds: settings.thresholds,
            hysteresis: settings.hysteresis,
            features: FeatureSet::for_level(level),
            batch: settings.batches.for_level(level.as_u8()),
            entered_at: Utc::now(),
        }
    }

    pub fn level(&self) -> TierLevel {
        self.level
    }

    pub fn thresholds(&self) -> [f64; 3] {
        self.thresholds
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    pub fn batch(&self) -> TierBatch {
        self.batch
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    /// Threshold that admitted this tier; `None` for Normal
    pub fn threshold(&self) -> Option<f64> {
        match self.level {
            TierLevel::Normal => None,
            level => Some(self.thresholds[level.as_u8() as usize - 1]),
        }
    }

    /// Pressure that samples must stay under to count toward descent
    pub fn descent_floor(&self) -> Option<f64> {
        self.threshold().map(|t| t - self.hysteresis)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierTransition {
    pub from: TierLevel,
    pub to: TierLevel,
    pub trigger: TierTrigger,
    pub pressure: Option<f64>,
    pub at: DateTime<Utc>,
    /// Time from the triggering call until every observer had run
    #[serde(with = "duration_micros")]
    pub activation: Duration,
}

impl TierTransition {
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}

mod duration_micros {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }
}

/// Receives every tier change
///
/// `on_tier_change` runs with the controller's transition lock held and
/// must not call back into the controller or block. `announce` runs after
/// the lock is released and may do slow work such as writing notices.
pub trait TierObserver: Send + Sync {
    fn on_tier_change(&self, tier: &EmergencyTier, transition: &TierTransition);

    fn announce(&self, _transition: &TierTransition) {}
}

#[derive(Debug, Clone)]
pub struct TierSettings {
    pub thresholds: [f64; 3],
    pub hysteresis: f64,
    pub descent_dwell: u32,
    pub batches: TierBatchTable,
}

impl TierSettings {
    pub fn from_config(config: &ObserveConfig) -> Self {
        Self {
            thresholds: config.pressure.thresholds,
            hysteresis: config.pressure.hysteresis,
            descent_dwell: config.pressure.descent_dwell_samples.max(1),
            batches: config.session.tiers,
        }
    }

    /// Highest tier whose threshold `pressure` meets
    pub fn level_for(&self, pressure: f64) -> TierLevel {
        self.thresholds
            .iter()
            .zip(&TierLevel::ALL[1..])
            .filter(|(threshold, _)| pressure >= **threshold)
            .map(|(_, level)| *level)
            .last()
            .unwrap_or(TierLevel::Normal)
    }
}

impl Default for TierSettings {
    fn default() -> Self {
        Self::from_config(&ObserveConfig::default())
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub level: TierLevel,
    pub features: Vec<&'static str>,
    pub pressure: Option<f64>,
    /// Consecutive samples counted toward the next descent
    pub pending_descent: u32,
    pub descent_dwell: u32,
    pub transitions: u64,
    pub last_transition: Option<TierTransition>,
}

#[derive(Default)]
struct ControllerState {
    below_count: u32,
    last_pressure: Option<f64>,
    transitions: u64,
    history: VecDeque<TierTransition>,
}

pub struct TierController {
    settings: TierSettings,
    current: RwLock<Arc<EmergencyTier>>,
    level: AtomicU8,
    state: Mutex<ControllerState>,
    observers: RwLock<Vec<Arc<dyn TierObserver>>>,
}

impl TierController {
    pub fn new(settings: TierSettings) -> Self {
        let initial = Arc::new(EmergencyTier::new(TierLevel::Normal, &settings));
        Self {
            settings,
            current: RwLock::new(initial),
            level: AtomicU8::new(TierLevel::Normal.as_u8()),
            state: Mutex::new(ControllerState::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &TierSettings {
        &self.settings
    }

    /// Snapshot of the active tier
    pub fn current(&self) -> Arc<EmergencyTier> {
        Arc::clone(&self.current.read())
    }

    pub fn level(&self) -> TierLevel {
        TierLevel::from_u8(self.level.load(Ordering::Acquire)).unwrap_or(TierLevel::Critical)
    }

    pub fn register(&self, observer: Arc<dyn TierObserver>) {
        self.observers.write().push(observer);
    }

    /// Feed one pressure sample
    pub fn observe(&self, pressure: f64) -> Option<TierTransition> {
        let transition = self.observe_locked(pressure)?;
        self.announce(&transition);
        Some(transition)
    }

    fn observe_locked(&self, pressure: f64) -> Option<TierTransition> {
        if pressure.is_nan() {
            return None;
        }
        let pressure = pressure.clamp(0.0, 1.0);
        let mut state = self.state.lock();
        state.last_pressure = Some(pressure);

        let current = self.level();
        let target = self.settings.level_for(pressure);
        if target > current {
            state.below_count = 0;
            return Some(self.transition(&mut state, target, TierTrigger::Pressure, Some(pressure)));
        }

        if matches!(current, TierLevel::Normal | TierLevel::Critical) {
            state.below_count = 0;
            return None;
        }

        let floor = self.settings.thresholds[current.as_u8() as usize - 1] - self.settings.hysteresis;
        if pressure >= floor {
            state.below_count = 0;
            return None;
        }

        state.below_count += 1;
        if state.below_count < self.settings.descent_dwell {
            return None;
        }
        state.below_count = 0;
        Some(self.transition(&mut state, current.down(), TierTrigger::Recovery, Some(pressure)))
    }

    /// Escalate one tier for a reason other than raw pressure
    pub fn request_escalation(&self, trigger: TierTrigger) -> Option<TierTransition> {
        let transition = {
            let mut state = self.state.lock();
            let current = self.level();
            if current == TierLevel::Critical {
                return None;
            }
            state.below_count = 0;
            let pressure = state.last_pressure;
            self.transition(&mut state, current.up(), trigger, pressure)
        };
        self.announce(&transition);
        Some(transition)
    }

    /// Return to Normal; the only way out of Critical
    pub fn reset(&self) -> Option<TierTransition> {
        let transition = {
            let mut state = self.state.lock();
            state.below_count = 0;
            if self.level() == TierLevel::Normal {
                return None;
            }
            let pressure = state.last_pressure;
            self.transition(&mut state, TierLevel::Normal, TierTrigger::Reset, pressure)
        };
        self.announce(&transition);
        Some(transition)
    }

    pub fn status(&self) -> TierStatus {
        let state = self.state.lock();
        let level = self.level();
        TierStatus {
            level,
            features: FeatureSet::for_level(level).names(),
            pressure: state.last_pressure,
            pending_descent: state.below_count,
            descent_dwell: self.settings.descent_dwell,
            transitions: state.transitions,
            last_transition: state.history.back().cloned(),
        }
    }

    /// Most recent transitions, oldest first
    pub fn history(&self) -> Vec<TierTransition> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Runs outside the state lock
    fn announce(&self, transition: &TierTransition) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.announce(transition);
        }
    }

    fn transition(
        &self,
        state: &mut ControllerState,
        to: TierLevel,
        trigger: TierTrigger,
        pressure: Option<f64>,
    ) -> TierTransition {
        let started = Instant::now();
        let from = self.level();
        let tier = Arc::new(EmergencyTier::new(to, &self.settings));

        *self.current.write() = Arc::clone(&tier);
        self.level.store(to.as_u8(), Ordering::Release);

        let mut transition = TierTransition {
            from,
            to,
            trigger,
            pressure,
            at: tier.entered_at(),
            activation: Duration::ZERO,
        };

        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_tier_change(&tier, &transition);
        }
        transition.activation = started.elapsed();

        if transition.activation > to.activation_budget() {
            warn!(
                tier = to.as_u8(),
                activation_us = transition.activation.as_micros() as u64,
                budget_ms = to.activation_budget().as_millis() as u64,
                "tier activation exceeded latency budget"
            );
        }
        info!(
            from = from.as_u8(),
            to = to.as_u8(),
            trigger = trigger.label(),
            pressure = pressure.unwrap_or(f64::NAN),
            "emergency tier changed"
        );

        state.transitions += 1;
        if state.history.len() == HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(transition.clone());
        transition
    }
}

impl fmt::Debug for TierController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierController")
            .field("level", &self.level())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
