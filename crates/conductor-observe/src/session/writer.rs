//! Background writer: one task per session, sole owner of its segments

use conductor_config::TierBatch;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::store::SegmentStore;
use super::{command_dir, segment_path, Session};
use crate::error::ObserveError;
use crate::ledger::FailureLedger;
use crate::record::LogRecord;

/// State shared by the manager and every writer
pub(crate) struct WriterShared {
    pub root: PathBuf,
    pub store: Arc<dyn SegmentStore>,
    pub batch: RwLock<TierBatch>,
    pub rotation_bytes: u64,
    pub max_queue_depth: usize,
    pub disabled: AtomicBool,
    pub ledger: Arc<FailureLedger>,
}

impl WriterShared {
    /// Disable the file sink for the rest of the process
    pub fn fail(&self, err: ObserveError) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            warn!(category = err.category(), error = %err, "session file sink disabled");
        }
        self.ledger.record(&err);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn batch(&self) -> TierBatch {
        *self.batch.read()
    }
}

/// One open session: metadata, FIFO queue and writer handle
pub(crate) struct SessionSlot {
    pub session: Mutex<Session>,
    pub queue: Mutex<VecDeque<LogRecord>>,
    pub wake: Notify,
    pub closing: AtomicBool,
    pub overflowing: AtomicBool,
    /// Records taken off the queue but not yet written
    pub in_flight: AtomicU64,
    pub task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSlot {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closing: AtomicBool::new(false),
            overflowing: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Drop everything still queued; returns how many records were lost
    pub fn discard_queue(&self) -> u64 {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len() as u64;
            queue.clear();
            n
        };
        self.session.lock().records_dropped += dropped;
        dropped
    }

    /// Drop the queue and the batch an aborted writer was holding
    pub fn abandon(&self) -> u64 {
        let in_flight = self.in_flight.swap(0, Ordering::AcqRel);
        self.session.lock().records_dropped += in_flight;
        in_flight + self.discard_queue()
    }

    fn take_chunk(&self, max: usize, depth_limit: usize) -> Vec<LogRecord> {
        let mut queue = self.queue.lock();
        let n = queue.len().min(max.max(1));
        let chunk: Vec<LogRecord> = queue.drain(..n).collect();
        if queue.len() < depth_limit / 2 {
            self.overflowing.store(false, Ordering::Release);
        }
        chunk
    }
}

pub(crate) async fn run(slot: Arc<SessionSlot>, shared: Arc<WriterShared>) {
    let (id, dir) = {
        let session = slot.session.lock();
        (session.id.clone(), command_dir(&shared.root, &session.command))
    };
    let mut dir_ready = false;

    loop {
        let batch = shared.batch();
        if !slot.closing.load(Ordering::Acquire) {
            tokio::select! {
                _ = slot.wake.notified() => {}
                _ = tokio::time::sleep(batch.flush_interval()) => {}
            }
        }

        if shared.is_disabled() {
            slot.discard_queue();
            break;
        }

        loop {
            let chunk = slot.take_chunk(shared.batch().max_batch, shared.max_queue_depth);
            if chunk.is_empty() {
                break;
            }
            slot.in_flight.store(chunk.len() as u64, Ordering::Release);
            if !dir_ready {
                if let Err(source) = shared.store.create_dir(&dir).await {
                    slot.abandon();
                    shared.fail(ObserveError::WriteFailure {
                        path: dir.clone(),
                        source,
                    });
                    return;
                }
                if let Err(err) = resume(&slot, &shared).await {
                    slot.abandon();
                    shared.fail(err);
                    return;
                }
                dir_ready = true;
            }
            if let Err(err) = write_chunk(&slot, &shared, chunk).await {
                slot.abandon();
                shared.fail(err);
                return;
            }
        }

        if slot.closing.load(Ordering::Acquire) && slot.queue.lock().is_empty() {
            break;
        }
    }
    debug!(session_id = %id, "session writer finished");
}

/// Continue after segments left by an earlier run with the same id
///
/// Picks up the newest existing segment and its size so the byte cap and
/// segment numbering carry on instead of restarting at segment 0.
async fn resume(slot: &SessionSlot, shared: &WriterShared) -> Result<(), ObserveError> {
    let (id, command, date) = {
        let s = slot.session.lock();
        (s.id.clone(), s.command.clone(), s.date())
    };
    let mut last = None;
    let mut segment = 0;
    loop {
        let path = segment_path(&shared.root, &command, date, &id, segment);
        let size = shared
            .store
            .size(&path)
            .await
            .map_err(|source| ObserveError::WriteFailure {
                path: path.clone(),
                source,
            })?;
        match size {
            Some(bytes) => last = Some((path, bytes, segment)),
            None => break,
        }
        segment += 1;
    }

    if let Some((path, bytes, segment)) = last {
        debug!(session_id = %id, segment, bytes, "resuming existing session segments");
        commit(slot, &path, bytes, segment, 0);
    }
    Ok(())
}

async fn write_chunk(
    slot: &SessionSlot,
    shared: &WriterShared,
    chunk: Vec<LogRecord>,
) -> Result<(), ObserveError> {
    let (id, command, date, mut path, mut bytes, mut segment) = {
        let s = slot.session.lock();
        (
            s.id.clone(),
            s.command.clone(),
            s.date(),
            s.path.clone(),
            s.bytes,
            s.rotation_count,
        )
    };
    let total = chunk.len() as u64;
    let mut pending = String::new();
    let mut pending_records = 0u64;

    for record in chunk {
        if bytes + pending.len() as u64 >= shared.rotation_bytes {
            if !pending.is_empty() {
                append(shared, &path, &pending, false).await?;
                bytes += pending.len() as u64;
                commit(slot, &path, bytes, segment, pending_records);
                pending.clear();
                pending_records = 0;
            }

            segment += 1;
            path = segment_path(&shared.root, &command, date, &id, segment);
            let marker = LogRecord::rotation_marker(id.clone(), segment).to_line();
            append(shared, &path, &marker, true).await?;
            bytes = marker.len() as u64;
            commit(slot, &path, bytes, segment, 0);
            debug!(session_id = %id, segment, "rotated session segment");
        }
        pending.push_str(&record.to_line());
        pending_records += 1;
    }

    if !pending.is_empty() {
        append(shared, &path, &pending, false).await?;
        bytes += pending.len() as u64;
        commit(slot, &path, bytes, segment, pending_records);
    }
    debug!(session_id = %id, records = total, "flushed session batch");
    Ok(())
}

async fn append(
    shared: &WriterShared,
    path: &std::path::Path,
    text: &str,
    rotating: bool,
) -> Result<(), ObserveError> {
    shared
        .store
        .append(path, text.as_bytes())
        .await
        .map_err(|source| {
            let path = path.to_path_buf();
            if rotating {
                ObserveError::RotationFailure { path, source }
            } else {
                ObserveError::WriteFailure { path, source }
            }
        })
}

fn commit(slot: &SessionSlot, path: &std::path::Path, bytes: u64, segment: u32, records: u64) {
    let mut session = slot.session.lock();
    if session.path != path {
        session.path = path.to_path_buf();
    }
    session.bytes = bytes;
    session.rotation_count = segment;
    session.records_written += records;
    slot.in_flight.fetch_sub(records, Ordering::AcqRel);
}
