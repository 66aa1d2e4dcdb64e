//! In-memory operation tracking for single-line progress output

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::id::CorrelationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded,
    Failed,
}

struct Operation {
    label: String,
    total: Option<u64>,
    current: u64,
    started: Instant,
    last_percent: Option<u64>,
    correlation: Option<CorrelationId>,
}

/// A finished operation
#[derive(Debug, Clone)]
pub struct CompletedOperation {
    pub id: OperationId,
    pub label: String,
    pub elapsed: Duration,
    pub correlation: Option<CorrelationId>,
}

#[derive(Default)]
pub struct OperationTracker {
    next: AtomicU64,
    ops: Mutex<HashMap<OperationId, Operation>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &self,
        label: &str,
        total: Option<u64>,
        correlation: Option<CorrelationId>,
    ) -> OperationId {
        let id = OperationId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.ops.lock().insert(
            id,
            Operation {
                label: label.to_string(),
                total,
                current: 0,
                started: Instant::now(),
                last_percent: None,
                correlation,
            },
        );
        id
    }

    /// Record progress; returns a line when it is worth printing
    ///
    /// With a known total a line is produced only when the whole percentage
    /// changes.
    pub fn update(&self, id: &OperationId, current: u64, note: Option<&str>) -> Option<String> {
        let mut ops = self.ops.lock();
        let op = ops.get_mut(id)?;
        op.current = current;
        match op.total {
            Some(total) if total > 0 => {
                let percent = current.min(total) * 100 / total;
                if op.last_percent == Some(percent) {
                    return None;
                }
                op.last_percent = Some(percent);
                Some(format_line(&op.label, &format!("[{current}/{total}] {percent}%"), note))
            }
            _ => Some(format_line(&op.label, &format!("[{current}]"), note)),
        }
    }

    pub fn correlation(&self, id: &OperationId) -> Option<CorrelationId> {
        self.ops.lock().get(id).and_then(|op| op.correlation.clone())
    }

    pub fn complete(&self, id: &OperationId) -> Option<CompletedOperation> {
        let op = self.ops.lock().remove(id)?;
        Some(CompletedOperation {
            id: *id,
            label: op.label,
            elapsed: op.started.elapsed(),
            correlation: op.correlation,
        })
    }

    pub fn active(&self) -> usize {
        self.ops.lock().len()
    }
}

fn format_line(label: &str, progress: &str, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{label} {progress}: {note}"),
        None => format!("{label} {progress}"),
    }
}

/// Compact human duration: `850ms`, `3.2s`, `2m05s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
