//! Explicit context owning every observability component
//!
//! Built once at process start and passed by reference. There is no global
//! logger; anything that logs receives the context (or the
//! [`DualStreamOutput`] it owns).

use chrono::Utc;
use conductor_config::ObserveConfig;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::correlation::CorrelationTracer;
use crate::error::ObserveResult;
use crate::guard::PerformanceGuard;
use crate::id::SessionId;
use crate::ledger::FailureLedger;
use crate::monitor::{source_for, MemoryPressureMonitor, MemorySource};
use crate::output::{resolve_color, DualStreamOutput, HumanSink};
use crate::session::{FsSegmentStore, SegmentStore, Session, SessionManager, ShutdownReport};
use crate::task::BackgroundTask;
use crate::tier::{TierController, TierLevel, TierObserver, TierSettings};

pub struct ObserveContextBuilder {
    config: ObserveConfig,
    human_writer: Option<Box<dyn Write + Send>>,
    color: Option<bool>,
    memory_source: Option<Arc<dyn MemorySource>>,
    segment_store: Option<Arc<dyn SegmentStore>>,
}

impl ObserveContextBuilder {
    pub fn new(config: ObserveConfig) -> Self {
        Self {
            config,
            human_writer: None,
            color: None,
            memory_source: None,
            segment_store: None,
        }
    }

    /// Send human lines somewhere other than the configured stream
    pub fn human_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.human_writer = Some(writer);
        self
    }

    pub fn color(mut self, enabled: bool) -> Self {
        self.color = Some(enabled);
        self
    }

    pub fn memory_source(mut self, source: Arc<dyn MemorySource>) -> Self {
        self.memory_source = Some(source);
        self
    }

    pub fn segment_store(mut self, store: Arc<dyn SegmentStore>) -> Self {
        self.segment_store = Some(store);
        self
    }

    pub fn build(self) -> ObserveResult<ObserveContext> {
        let config = self.config;
        config.validate()?;

        let human = Arc::new(match self.human_writer {
            Some(writer) => {
                let color = self
                    .color
                    .unwrap_or_else(|| resolve_color(config.output.color, false));
                HumanSink::new(writer, color)
            }
            None => HumanSink::for_stream(config.output.human_stream, config.output.color),
        });
        let ledger = Arc::new(FailureLedger::new(Arc::clone(&human)));
        let controller = Arc::new(TierController::new(TierSettings::from_config(&config)));

        let source = self
            .memory_source
            .unwrap_or_else(|| source_for(&config.pressure));
        let monitor = Arc::new(MemoryPressureMonitor::new(
            source,
            Arc::clone(&ledger),
            Duration::from_millis(config.pressure.warning_interval_ms),
        ));

        let store = self
            .segment_store
            .unwrap_or_else(|| Arc::new(FsSegmentStore));
        let sessions = Arc::new(SessionManager::new(
            &config,
            store,
            Arc::clone(&ledger),
            &controller,
        ));
        controller.register(Arc::clone(&sessions) as Arc<dyn TierObserver>);

        let tracer = Arc::new(CorrelationTracer::new(Duration::from_secs(
            config.correlation.retention_secs,
        )));
        let guard = Arc::new(PerformanceGuard::new(
            config.guard.clone(),
            Arc::clone(&controller),
            Some(Arc::clone(&monitor)),
        ));
        let output = Arc::new(DualStreamOutput::new(
            human,
            &controller,
            Arc::clone(&sessions),
            Arc::clone(&tracer),
            Arc::clone(&guard),
            config.output.correlation_suffix_len,
        ));

        debug!(
            root = %config.root_dir.display(),
            source = monitor.source_name(),
            "observability context built"
        );
        Ok(ObserveContext {
            config,
            ledger,
            controller,
            monitor,
            sessions,
            tracer,
            guard,
            output,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

pub struct ObserveContext {
    config: ObserveConfig,
    ledger: Arc<FailureLedger>,
    controller: Arc<TierController>,
    monitor: Arc<MemoryPressureMonitor>,
    sessions: Arc<SessionManager>,
    tracer: Arc<CorrelationTracer>,
    guard: Arc<PerformanceGuard>,
    output: Arc<DualStreamOutput>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl ObserveContext {
    pub fn builder(config: ObserveConfig) -> ObserveContextBuilder {
        ObserveContextBuilder::new(config)
    }

    pub fn config(&self) -> &ObserveConfig {
        &self.config
    }

    pub fn output(&self) -> &Arc<DualStreamOutput> {
        &self.output
    }

    pub fn controller(&self) -> &Arc<TierController> {
        &self.controller
    }

    pub fn monitor(&self) -> &Arc<MemoryPressureMonitor> {
        &self.monitor
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn tracer(&self) -> &Arc<CorrelationTracer> {
        &self.tracer
    }

    pub fn guard(&self) -> &Arc<PerformanceGuard> {
        &self.guard
    }

    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }

    /// Start the memory sampler and correlation sweeper
    ///
    /// Returns false without a tokio runtime or when already running.
    pub fn start_background(&self) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime; memory sampling disabled");
            return false;
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return false;
        }
        tasks.push(self.monitor.spawn_sampler(
            Duration::from_millis(self.config.pressure.sample_interval_ms),
            Arc::clone(&self.controller),
        ));
        tasks.push(self.tracer.spawn_sweeper(Duration::from_secs(
            self.config.correlation.sweep_interval_secs,
        )));
        true
    }

    /// One pressure sample fed straight to the controller
    pub fn probe(&self) -> (f64, TierLevel) {
        let ratio = self.monitor.sample();
        self.controller.observe(ratio);
        (ratio, self.controller.level())
    }

    /// Open a session for `command` and make it the facade's default
    pub fn begin_command(&self, command: &str, id: Option<SessionId>) -> ObserveResult<SessionId> {
        let id = id.unwrap_or_else(|| SessionId::generate(Utc::now()));
        self.sessions.begin_session(command, id.clone())?;
        self.guard.begin_command();
        self.output.bind_session(id.clone());
        Ok(id)
    }

    /// Drain and close the bound session
    pub async fn finish_command(&self) -> Option<Session> {
        let id = self.output.unbind_session()?;
        self.sessions.complete(&id).await
    }

    /// Stop background tasks and flush every session within the timeout
    pub async fn shutdown(&self) -> ShutdownReport {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        futures::future::join_all(tasks.into_iter().map(BackgroundTask::stop)).await;
        self.output.unbind_session();
        let report = self.sessions.shutdown().await;
        if report.dropped_records() > 0 {
            warn!(
                dropped = report.dropped_records(),
                sessions = report.truncated.len(),
                "session records dropped at shutdown"
            );
        }
        report
    }
}

impl std::fmt::Debug for ObserveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserveContext")
            .field("root", &self.config.root_dir)
            .field("tier", &self.controller.level())
            .field("sessions", &self.sessions.sessions().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObserveError;
    use crate::monitor::MemoryReading;
    use crate::output::LogMeta;
    use crate::session::load_session;
    use std::io;
    use tempfile::TempDir;

    struct Fixed(f64);

    impl MemorySource for Fixed {
        fn read(&self) -> ObserveResult<MemoryReading> {
            Ok(MemoryReading {
                used_bytes: (self.0 * 1000.0) as u64,
                total_bytes: 1000,
            })
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn context(dir: &TempDir, pressure: f64) -> ObserveContext {
        let config = ObserveConfig {
            root_dir: dir.path().to_path_buf(),
            ..ObserveConfig::default()
        };
        ObserveContext::builder(config)
            .human_writer(Box::new(io::sink()))
            .memory_source(Arc::new(Fixed(pressure)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ObserveConfig::default();
        config.pressure.thresholds = [0.99, 0.95, 0.995];
        let err = ObserveContext::builder(config)
            .human_writer(Box::new(io::sink()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ObserveError::Config(_)));
    }

    #[test]
    fn test_probe_drives_controller() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 0.97);
        let (ratio, level) = ctx.probe();
        assert!((ratio - 0.97).abs() < 1e-9);
        assert_eq!(level, TierLevel::Elevated);
    }

    #[tokio::test]
    async fn test_command_lifecycle() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 0.5);
        assert!(ctx.start_background());
        assert!(!ctx.start_background());

        let id = ctx
            .begin_command("deploy", Some(SessionId::parse("init").unwrap()))
            .unwrap();
        assert_eq!(ctx.output().active_session(), Some(id.clone()));
        ctx.output().info("one", LogMeta::new());
        ctx.output().info("two", LogMeta::new());

        let session = ctx.finish_command().await.unwrap();
        assert_eq!(session.records_written, 2);
        assert!(ctx.output().active_session().is_none());

        let report = ctx.shutdown().await;
        assert_eq!(report.dropped_records(), 0);

        let records = load_session(dir.path(), "deploy", &id).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_background_needs_runtime() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 0.5);
        assert!(!ctx.start_background());
    }
}
