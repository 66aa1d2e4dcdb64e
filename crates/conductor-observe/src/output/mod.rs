//! Dual-stream output facade
//!
//! [`DualStreamOutput`] is the only way commands emit diagnostics. Each call
//! writes a human line immediately and, when the active tier allows session
//! files, queues a structured record for the session writer. The facade has
//! no handle on the protocol stream; see [`crate::protocol::ProtocolChannel`].
//!
//! What a call does depends on the tier's feature set:
//!
//! | tier | human line | correlation suffix | progress updates | file record |
//! |---|---|---|---|---|
//! | 0, 1 | glyph | yes | yes | yes |
//! | 2 | glyph | no | no | no |
//! | 3 | `LEVEL message` | no | no | no |
//!
//! Under tiers 2 and 3 info and success lines from non-essential components
//! are dropped from the human stream.

mod human;
mod progress;

pub use human::{glyph, resolve_color, HumanSink, LineStyle};
pub use progress::{
    format_elapsed, CompletedOperation, OperationId, OperationOutcome, OperationTracker,
};

use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::component::Component;
use crate::correlation::{CorrelationTracer, SystemTag};
use crate::guard::PerformanceGuard;
use crate::id::{CorrelationId, SessionId};
use crate::record::{Level, LogRecord};
use crate::session::{AppendOutcome, SessionManager};
use crate::tier::{EmergencyTier, FeatureSet, TierController, TierLevel, TierObserver, TierTransition};

/// Optional context attached to a facade call
#[derive(Debug, Clone, Default)]
pub struct LogMeta {
    correlation: Option<CorrelationId>,
    component: Component,
    session: Option<SessionId>,
    payload: Option<Value>,
}

impl LogMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(component: Component) -> Self {
        Self {
            component,
            ..Self::default()
        }
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation = Some(id);
        self
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.component = component;
        self
    }

    /// Route the file record to a session other than the bound one
    pub fn with_session(mut self, id: SessionId) -> Self {
        self.session = Some(id);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Feature set of the active tier, readable without locking
#[derive(Debug)]
struct FeatureGate(AtomicU8);

impl FeatureGate {
    fn new(features: FeatureSet) -> Self {
        Self(AtomicU8::new(features.bits()))
    }

    fn load(&self) -> FeatureSet {
        FeatureSet::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, features: FeatureSet) {
        self.0.store(features.bits(), Ordering::Release);
    }
}

/// Applies tier changes to the facade and announces them once
struct OutputHook {
    gate: Arc<FeatureGate>,
    human: Arc<HumanSink>,
}

impl TierObserver for OutputHook {
    fn on_tier_change(&self, tier: &EmergencyTier, _transition: &TierTransition) {
        let features = tier.features();
        self.gate.store(features);
        self.human.set_plain(features.contains(FeatureSet::CONSOLE_ONLY));
    }

    fn announce(&self, transition: &TierTransition) {
        self.human.notice(&tier_notice(transition));
    }
}

/// One-line operator notice for a tier change
pub fn tier_notice(transition: &TierTransition) -> String {
    let cause = match transition.pressure {
        Some(p) => format!("{} at {:.3}", transition.trigger.label(), p),
        None => transition.trigger.label().to_string(),
    };
    let effect = match transition.to {
        TierLevel::Normal | TierLevel::Elevated => "full logging",
        TierLevel::Severe => "minimal logging, session files paused",
        TierLevel::Critical => "console only until reset",
    };
    format!(
        "emergency tier {} -> {} ({}): {effect}",
        transition.from.as_u8(),
        transition.to.as_u8(),
        cause
    )
}

#[derive(Debug, Clone)]
struct Binding {
    session: SessionId,
    correlation: Option<CorrelationId>,
}

/// What a call should do under the current features
#[derive(Debug, Clone, Copy)]
struct Routing {
    style: LineStyle,
    suffix: bool,
    progress: bool,
    files: bool,
    minimal: bool,
}

impl Routing {
    fn for_features(features: FeatureSet) -> Self {
        let console_only = features.contains(FeatureSet::CONSOLE_ONLY);
        let minimal = console_only || features.contains(FeatureSet::MINIMAL_LOGGING);
        Self {
            style: if console_only {
                LineStyle::Plain
            } else {
                LineStyle::Rich
            },
            suffix: features.contains(FeatureSet::CORRELATION),
            progress: !minimal,
            files: features.contains(FeatureSet::SESSION_FILES),
            minimal,
        }
    }

    fn shows(&self, level: Level, component: Component) -> bool {
        !self.minimal
            || component.is_essential()
            || matches!(level, Level::Warning | Level::Error)
    }
}

pub struct DualStreamOutput {
    human: Arc<HumanSink>,
    gate: Arc<FeatureGate>,
    sessions: Arc<SessionManager>,
    tracer: Arc<CorrelationTracer>,
    guard: Arc<PerformanceGuard>,
    operations: OperationTracker,
    binding: RwLock<Option<Binding>>,
    suffix_len: usize,
}

impl DualStreamOutput {
    /// Build the facade and subscribe it to tier changes
    pub fn new(
        human: Arc<HumanSink>,
        controller: &TierController,
        sessions: Arc<SessionManager>,
        tracer: Arc<CorrelationTracer>,
        guard: Arc<PerformanceGuard>,
        suffix_len: usize,
    ) -> Self {
        let gate = Arc::new(FeatureGate::new(controller.current().features()));
        controller.register(Arc::new(OutputHook {
            gate: Arc::clone(&gate),
            human: Arc::clone(&human),
        }));
        Self {
            human,
            gate,
            sessions,
            tracer,
            guard,
            operations: OperationTracker::new(),
            binding: RwLock::new(None),
            suffix_len,
        }
    }

    /// Make `session` the default target of file records
    ///
    /// Returns the root correlation id of the invocation, when correlation
    /// is enabled.
    pub fn bind_session(&self, session: SessionId) -> Option<CorrelationId> {
        let correlation = self
            .features()
            .contains(FeatureSet::CORRELATION)
            .then(|| self.tracer.create(None, SystemTag::Local));
        *self.binding.write() = Some(Binding {
            session,
            correlation: correlation.clone(),
        });
        correlation
    }

    pub fn unbind_session(&self) -> Option<SessionId> {
        self.binding.write().take().map(|b| b.session)
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.binding.read().as_ref().map(|b| b.session.clone())
    }

    pub fn root_correlation(&self) -> Option<CorrelationId> {
        self.binding.read().as_ref().and_then(|b| b.correlation.clone())
    }

    pub fn features(&self) -> FeatureSet {
        self.gate.load()
    }

    pub fn human(&self) -> &Arc<HumanSink> {
        &self.human
    }

    /// New correlation context under `parent` or the invocation root
    pub fn correlate(&self, parent: Option<&CorrelationId>) -> Option<CorrelationId> {
        if !self.features().contains(FeatureSet::CORRELATION) {
            return None;
        }
        let root = self.root_correlation();
        Some(self.tracer.create(parent.or(root.as_ref()), SystemTag::Local))
    }

    pub fn info(&self, message: impl AsRef<str>, meta: LogMeta) {
        self.log(Level::Info, message.as_ref(), meta);
    }

    pub fn success(&self, message: impl AsRef<str>, meta: LogMeta) {
        self.log(Level::Success, message.as_ref(), meta);
    }

    pub fn warning(&self, message: impl AsRef<str>, meta: LogMeta) {
        self.log(Level::Warning, message.as_ref(), meta);
    }

    pub fn error(&self, message: impl AsRef<str>, meta: LogMeta) {
        self.log(Level::Error, message.as_ref(), meta);
    }

    /// Leveled line on the human stream, plus a file record when allowed
    pub fn log(&self, level: Level, message: &str, meta: LogMeta) {
        self.guard
            .measure(level_operation(level), || self.emit(level, message, meta));
    }

    /// File-only record; returns at once when session files are off
    pub fn debug_session(&self, level: Level, message: impl AsRef<str>, meta: LogMeta) {
        if !self.features().contains(FeatureSet::SESSION_FILES) {
            return;
        }
        self.guard.measure("debug_session", || {
            let correlation = meta.correlation.clone().or_else(|| self.root_correlation());
            self.persist(level, message.as_ref(), meta, correlation);
        });
    }

    pub fn start_operation(&self, label: &str, total: Option<u64>, meta: LogMeta) -> OperationId {
        self.guard.measure("start_operation", || {
            let parent = meta.correlation.clone();
            let correlation = self.correlate(parent.as_ref());
            let id = self.operations.start(label, total, correlation.clone());
            let meta = LogMeta {
                correlation: correlation.or(parent),
                payload: Some(json!({ "operation": id.to_string(), "total": total })),
                ..meta
            };
            self.emit(Level::Info, &format!("{label} started"), meta);
            id
        })
    }

    /// Single-line progress; dropped under minimal logging
    pub fn update_progress(&self, id: &OperationId, current: u64, note: Option<&str>) {
        self.guard.measure("update_progress", || {
            let line = self.operations.update(id, current, note);
            if !Routing::for_features(self.features()).progress {
                return;
            }
            if let Some(line) = line {
                self.human.write_line(&format!("  → {line}"));
            }
        });
    }

    pub fn complete_operation(&self, id: &OperationId, outcome: OperationOutcome, meta: LogMeta) {
        self.guard.measure("complete_operation", || {
            let Some(done) = self.operations.complete(id) else {
                return;
            };
            let elapsed = format_elapsed(done.elapsed);
            let (level, message) = match outcome {
                OperationOutcome::Succeeded => (Level::Success, format!("{} done in {elapsed}", done.label)),
                OperationOutcome::Failed => (Level::Error, format!("{} failed after {elapsed}", done.label)),
            };
            let meta = LogMeta {
                correlation: meta.correlation.clone().or(done.correlation),
                payload: Some(json!({
                    "operation": done.id.to_string(),
                    "elapsed_ms": done.elapsed.as_millis() as u64,
                })),
                ..meta
            };
            self.emit(level, &message, meta);
        });
    }

    pub fn active_operations(&self) -> usize {
        self.operations.active()
    }

    fn emit(&self, level: Level, message: &str, meta: LogMeta) {
        let routing = Routing::for_features(self.features());
        let correlation = meta.correlation.clone().or_else(|| self.root_correlation());

        if routing.shows(level, meta.component) {
            let suffix = correlation
                .as_ref()
                .filter(|_| routing.suffix)
                .map(|c| c.short(self.suffix_len));
            self.human.line(level, message, suffix, routing.style);
        }

        if routing.files {
            self.persist(level, message, meta, correlation);
        }
    }

    fn persist(
        &self,
        level: Level,
        message: &str,
        meta: LogMeta,
        correlation: Option<CorrelationId>,
    ) {
        if self.sessions.is_disabled() {
            return;
        }
        let Some(session) = meta.session.or_else(|| self.active_session()) else {
            return;
        };
        let record = LogRecord::new(level, message, meta.component)
            .with_correlation(correlation)
            .with_session(session.clone())
            .with_payload(meta.payload.as_ref());
        if let AppendOutcome::UnknownSession = self.sessions.append(record, &session) {
            tracing::trace!(session_id = %session, "record for unknown session dropped");
        }
    }
}

impl std::fmt::Debug for DualStreamOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualStreamOutput")
            .field("features", &self.features())
            .field("session", &self.active_session())
            .finish_non_exhaustive()
    }
}

fn level_operation(level: Level) -> &'static str {
    match level {
        Level::Debug => "debug",
        Level::Info => "info",
        Level::Success => "success",
        Level::Warning => "warning",
        Level::Error => "error",
    }
}
