//! Memory-pressure-adaptive logging for conductor
//!
//! Commands emit diagnostics through [`DualStreamOutput`], which writes a
//! human-readable line immediately and queues a structured record for the
//! invocation's session file. A sampler feeds memory pressure to the
//! [`TierController`]; as pressure rises the controller sheds features
//! (session files, correlation suffixes, progress lines) in discrete tiers.
//!
//! # Streams
//!
//! - human stream: glyph-prefixed lines, stdout or stderr
//! - session files: `<root>/sessions/<command>/<YYYY-MM-DD>_<id>.log`,
//!   one pipe-delimited record per line
//! - protocol stream: owned by [`ProtocolChannel`], never reachable from
//!   the facade
//!
//! # Example
//!
//! ```no_run
//! use conductor_config::ObserveConfig;
//! use conductor_observe::{LogMeta, ObserveContext};
//!
//! # async fn example() -> Result<(), conductor_observe::ObserveError> {
//! let ctx = ObserveContext::builder(ObserveConfig::default()).build()?;
//! ctx.start_background();
//!
//! let session = ctx.begin_command("deploy", None)?;
//! ctx.output().info(format!("session {session}"), LogMeta::new());
//! ctx.output().success("deployed", LogMeta::new());
//!
//! ctx.finish_command().await;
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod component;
pub mod context;
pub mod correlation;
pub mod error;
pub mod guard;
pub mod id;
pub mod ledger;
pub mod monitor;
pub mod output;
pub mod protocol;
pub mod record;
pub mod redact;
pub mod session;
pub mod task;
pub mod tier;

// Re-exports for convenience
pub use component::Component;
pub use context::{ObserveContext, ObserveContextBuilder};
pub use correlation::{CorrelationContext, CorrelationTracer, Direction, SystemTag};
pub use error::{FailureClass, ObserveError, ObserveResult};
pub use guard::{GuardStats, PerformanceGuard, PerformanceSample};
pub use id::{CorrelationId, IdError, SessionId};
pub use ledger::FailureLedger;
pub use monitor::{MemoryPressureMonitor, MemoryReading, MemorySource, ProcessMemory, SystemMemory};
pub use output::{DualStreamOutput, HumanSink, LogMeta, OperationId, OperationOutcome};
pub use protocol::{MessageKey, ProtocolChannel, ProtocolMessage};
pub use record::{Level, LogRecord};
pub use session::{
    list_sessions, load_session, AppendOutcome, FsSegmentStore, SegmentStore, Session,
    SessionListing, SessionManager, ShutdownReport,
};
pub use tier::{
    EmergencyTier, FeatureSet, TierController, TierLevel, TierObserver, TierSettings, TierStatus,
    TierTransition, TierTrigger,
};
