//! Shared test doubles for conductor-observe integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use conductor_config::ObserveConfig;
use conductor_observe::{
    FsSegmentStore, MemoryReading, MemorySource, ObserveContext, ObserveError, ObserveResult,
    SegmentStore,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Cloneable in-memory writer
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).expect("utf-8 output")
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pressure source that replays a script, then repeats the last value
pub struct ScriptedMemory {
    script: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedMemory {
    pub fn new(script: impl IntoIterator<Item = f64>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(0.0),
        }
    }

    pub fn fixed(pressure: f64) -> Self {
        Self::new([pressure])
    }

    pub fn push(&self, pressure: f64) {
        self.script.lock().push_back(pressure);
    }
}

impl MemorySource for ScriptedMemory {
    fn read(&self) -> ObserveResult<MemoryReading> {
        let mut last = self.last.lock();
        if let Some(next) = self.script.lock().pop_front() {
            *last = next;
        }
        Ok(MemoryReading {
            used_bytes: (*last * 1_000_000.0).round() as u64,
            total_bytes: 1_000_000,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Source that always fails
pub struct BrokenMemory;

impl MemorySource for BrokenMemory {
    fn read(&self) -> ObserveResult<MemoryReading> {
        Err(ObserveError::MonitorUnavailable("no meminfo".into()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Store whose writes never complete
#[derive(Default)]
pub struct StalledStore {
    pub calls: AtomicU64,
}

#[async_trait]
impl SegmentStore for StalledStore {
    async fn create_dir(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    async fn append(&self, _path: &Path, _bytes: &[u8]) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn size(&self, _path: &Path) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

/// Store whose writes always fail
#[derive(Default)]
pub struct FailingStore {
    pub calls: AtomicU64,
}

#[async_trait]
impl SegmentStore for FailingStore {
    async fn create_dir(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    async fn append(&self, _path: &Path, _bytes: &[u8]) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    }

    async fn size(&self, _path: &Path) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

/// Local disk whose first append hangs; later appends go through
#[derive(Default)]
pub struct StallFirstAppend {
    disk: FsSegmentStore,
    stalled: AtomicBool,
}

#[async_trait]
impl SegmentStore for StallFirstAppend {
    async fn create_dir(&self, dir: &Path) -> io::Result<()> {
        self.disk.create_dir(dir).await
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.disk.append(path, bytes).await
    }

    async fn size(&self, path: &Path) -> io::Result<Option<u64>> {
        self.disk.size(path).await
    }
}

/// Config rooted in `dir` with overhead escalation switched off
pub fn config(dir: &TempDir) -> ObserveConfig {
    let mut config = ObserveConfig {
        root_dir: dir.path().to_path_buf(),
        ..ObserveConfig::default()
    };
    config.guard.min_samples = usize::MAX;
    config
}

/// Context writing human lines into a buffer
pub fn context_with(
    config: ObserveConfig,
    source: Arc<dyn MemorySource>,
    store: Option<Arc<dyn SegmentStore>>,
) -> (ObserveContext, SharedBuffer) {
    let human = SharedBuffer::default();
    let mut builder = ObserveContext::builder(config)
        .human_writer(Box::new(human.clone()))
        .color(false)
        .memory_source(source);
    if let Some(store) = store {
        builder = builder.segment_store(store);
    }
    (builder.build().expect("context builds"), human)
}
