use conductor_config::{ObserveConfig, TierBatch};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::SegmentStore;
use super::writer::{self, SessionSlot, WriterShared};
use super::{command_dir, Session};
use crate::error::{ObserveError, ObserveResult};
use crate::id::{validate_command_name, SessionId};
use crate::ledger::FailureLedger;
use crate::record::LogRecord;
use crate::tier::{EmergencyTier, TierController, TierObserver, TierTransition, TierTrigger};

/// Budget for the best-effort truncation marker after a timed-out flush
const MARKER_TIMEOUT: Duration = Duration::from_millis(50);

/// What happened to an appended record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Queued,
    /// Queue full; the record was dropped
    Shed,
    /// File sink disabled after an earlier failure
    Disabled,
    /// Session already completed
    Closed,
    UnknownSession,
}

/// Result of [`SessionManager::shutdown`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub sessions: usize,
    pub flushed: usize,
    /// Sessions whose queues were dropped, with the number of lost records
    pub truncated: Vec<(SessionId, u64)>,
}

impl ShutdownReport {
    pub fn dropped_records(&self) -> u64 {
        self.truncated.iter().map(|(_, n)| n).sum()
    }
}

/// Owns every session's queue and writer task
pub struct SessionManager {
    shared: Arc<WriterShared>,
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    controller: Weak<TierController>,
    shutdown_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        config: &ObserveConfig,
        store: Arc<dyn SegmentStore>,
        ledger: Arc<FailureLedger>,
        controller: &Arc<TierController>,
    ) -> Self {
        let batch = controller.current().batch();
        Self {
            shared: Arc::new(WriterShared {
                root: config.root_dir.clone(),
                store,
                batch: RwLock::new(batch),
                rotation_bytes: config.session.rotation_bytes,
                max_queue_depth: config.session.max_queue_depth,
                disabled: AtomicBool::new(false),
                ledger,
            }),
            sessions: DashMap::new(),
            controller: Arc::downgrade(controller),
            shutdown_timeout: Duration::from_millis(config.session.shutdown_timeout_ms),
        }
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// Register a session and start its writer
    ///
    /// Nothing touches the disk until the first batch is flushed. Returns
    /// `false` when the session was already registered.
    pub fn begin_session(&self, command: &str, id: SessionId) -> ObserveResult<bool> {
        validate_command_name(command)?;
        // The shard stays locked until the slot is in place
        let Entry::Vacant(vacant) = self.sessions.entry(id.clone()) else {
            return Ok(false);
        };

        let session = Session::new(&self.shared.root, command, id.clone());
        let slot = Arc::new(SessionSlot::new(session));
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(writer::run(Arc::clone(&slot), Arc::clone(&self.shared)));
                *slot.task.lock() = Some(task);
            }
            Err(_) => self.shared.fail(ObserveError::WriteFailure {
                path: command_dir(&self.shared.root, command),
                source: io::Error::new(io::ErrorKind::Other, "no async runtime for session writer"),
            }),
        }

        info!(session_id = %id, command, "session started");
        vacant.insert(slot);
        Ok(true)
    }

    /// Queue a record; never blocks and never fails the caller
    pub fn append(&self, record: LogRecord, session: &SessionId) -> AppendOutcome {
        if self.shared.is_disabled() {
            return AppendOutcome::Disabled;
        }
        let Some(slot) = self.sessions.get(session).map(|s| Arc::clone(s.value())) else {
            return AppendOutcome::UnknownSession;
        };
        if slot.closing.load(Ordering::Acquire) {
            return AppendOutcome::Closed;
        }

        let max = self.shared.max_queue_depth;
        let depth = {
            let mut queue = slot.queue.lock();
            if queue.len() >= max {
                None
            } else {
                queue.push_back(record);
                Some(queue.len())
            }
        };

        match depth {
            Some(depth) => {
                if depth >= self.shared.batch().max_batch {
                    slot.wake.notify_one();
                }
                AppendOutcome::Queued
            }
            None => {
                slot.session.lock().records_dropped += 1;
                if !slot.overflowing.swap(true, Ordering::AcqRel) {
                    self.shared
                        .ledger
                        .record(&ObserveError::QueueOverflow { depth: max, max });
                    if let Some(controller) = self.controller.upgrade() {
                        controller.request_escalation(TierTrigger::QueueOverflow);
                    }
                }
                AppendOutcome::Shed
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.is_disabled()
    }

    /// Batch configuration currently applied to writers
    pub fn batch(&self) -> TierBatch {
        self.shared.batch()
    }

    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|slot| slot.session.lock().clone())
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|slot| slot.session.lock().clone())
            .collect()
    }

    pub fn queue_depth(&self, id: &SessionId) -> usize {
        self.sessions
            .get(id)
            .map(|slot| slot.queue.lock().len())
            .unwrap_or(0)
    }

    /// Drain and close one session, waiting at most the shutdown timeout
    pub async fn complete(&self, id: &SessionId) -> Option<Session> {
        let slot = self.sessions.get(id).map(|s| Arc::clone(s.value()))?;
        let deadline = Instant::now() + self.shutdown_timeout;
        let dropped = self.close_slot(&slot, deadline).await;
        if dropped > 0 {
            warn!(session_id = %id, dropped, "session completed with dropped records");
        }
        let session = slot.session.lock().clone();
        Some(session)
    }

    /// Flush every open session within the configured timeout
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_within(self.shutdown_timeout).await
    }

    pub async fn shutdown_within(&self, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        let slots: Vec<(SessionId, Arc<SessionSlot>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        // Signal everyone first so writers drain in parallel
        for (_, slot) in &slots {
            slot.closing.store(true, Ordering::Release);
            slot.wake.notify_one();
        }

        let mut report = ShutdownReport {
            sessions: slots.len(),
            ..Default::default()
        };
        for (id, slot) in slots {
            let dropped = self.close_slot(&slot, deadline).await;
            if dropped > 0 {
                report.truncated.push((id, dropped));
            } else {
                report.flushed += 1;
            }
        }
        debug!(
            sessions = report.sessions,
            flushed = report.flushed,
            dropped = report.dropped_records(),
            "session manager shut down"
        );
        report
    }

    /// Returns the number of records dropped
    async fn close_slot(&self, slot: &SessionSlot, deadline: Instant) -> u64 {
        slot.closing.store(true, Ordering::Release);
        slot.wake.notify_one();

        let task = slot.task.lock().take();
        let mut dropped = 0;
        if let Some(mut task) = task {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                dropped = slot.abandon();
                self.write_truncation_marker(slot, dropped).await;
            }
        } else {
            dropped = slot.discard_queue();
        }

        slot.session.lock().closed = true;
        dropped
    }

    async fn write_truncation_marker(&self, slot: &SessionSlot, dropped: u64) {
        if self.shared.is_disabled() {
            return;
        }
        let (id, path) = {
            let session = slot.session.lock();
            (session.id.clone(), session.path.clone())
        };
        let line = LogRecord::truncation_marker(id.clone(), dropped).to_line();
        let write = self.shared.store.append(&path, line.as_bytes());
        match tokio::time::timeout(MARKER_TIMEOUT, write).await {
            Ok(Ok(())) => debug!(session_id = %id, dropped, "wrote truncation marker"),
            _ => debug!(session_id = %id, dropped, "truncation marker not written"),
        }
    }
}

impl TierObserver for SessionManager {
    fn on_tier_change(&self, tier: &EmergencyTier, _transition: &TierTransition) {
        *self.shared.batch.write() = tier.batch();
        for slot in self.sessions.iter() {
            slot.wake.notify_one();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("root", &self.shared.root)
            .field("sessions", &self.sessions.len())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
