//! Per-class failure counting with a single operator notice per class

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::error::{FailureClass, ObserveError};
use crate::output::HumanSink;

pub struct FailureLedger {
    counts: [AtomicU64; 4],
    human: Arc<HumanSink>,
}

impl FailureLedger {
    pub fn new(human: Arc<HumanSink>) -> Self {
        Self {
            counts: Default::default(),
            human,
        }
    }

    /// Count an error; returns true if this was the first of its class
    pub fn record(&self, err: &ObserveError) -> bool {
        match err.failure_class() {
            Some(class) => self.record_class(class, &err.to_string()),
            None => false,
        }
    }

    /// Count a failure of `class`; the first one is announced
    pub fn record_class(&self, class: FailureClass, detail: &str) -> bool {
        let previous = self.counts[class.index()].fetch_add(1, Ordering::AcqRel);
        if previous > 0 {
            return false;
        }
        warn!(class = ?class, detail, "{}", class.operator_message());
        self.human.notice(class.operator_message());
        true
    }

    pub fn count(&self, class: FailureClass) -> u64 {
        self.counts[class.index()].load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        FailureClass::ALL.iter().map(|c| self.count(*c)).sum()
    }
}

impl std::fmt::Debug for FailureLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("FailureLedger");
        for class in FailureClass::ALL {
            s.field(&format!("{class:?}"), &self.count(class));
        }
        s.finish()
    }
}
