//! End-to-end behavior of the output facade under different tiers and disks

mod common;

use common::{context_with, FailingStore, ScriptedMemory, StalledStore};
use conductor_observe::{load_session, FailureClass, LogMeta, SegmentStore, SessionId, TierLevel};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_init_session_at_normal_pressure() {
    let dir = TempDir::new().unwrap();
    let (ctx, human) = context_with(
        common::config(&dir),
        Arc::new(ScriptedMemory::fixed(0.80)),
        None,
    );
    assert_eq!(ctx.probe().1, TierLevel::Normal);

    let id = ctx
        .begin_command("init", Some(SessionId::parse("init").unwrap()))
        .unwrap();
    for step in ["reading config", "creating layout", "writing manifest"] {
        ctx.output().info(step, LogMeta::new());
    }
    let session = ctx.finish_command().await.unwrap();
    assert_eq!(session.records_written, 3);

    let records = load_session(dir.path(), "init", &id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].message(), "writing manifest");
    assert_eq!(human.lines().len(), 3);
}

#[tokio::test]
async fn test_init_session_at_critical_pressure() {
    let dir = TempDir::new().unwrap();
    let (ctx, human) = context_with(
        common::config(&dir),
        Arc::new(ScriptedMemory::fixed(0.995)),
        None,
    );
    assert_eq!(ctx.probe().1, TierLevel::Critical);
    let notices = human.lines().len();
    assert_eq!(notices, 1);
    assert!(human.lines()[0].starts_with("WARN emergency tier 0 -> 3"));

    let id = ctx
        .begin_command("init", Some(SessionId::parse("init").unwrap()))
        .unwrap();
    for step in ["reading config", "creating layout", "writing manifest"] {
        ctx.output().info(step, LogMeta::new());
    }
    let session = ctx.finish_command().await.unwrap();
    assert_eq!(session.records_written, 0);

    let lines = human.lines();
    assert_eq!(lines.len() - notices, 3);
    assert_eq!(lines[notices], "INFO reading config");
    assert!(load_session(dir.path(), "init", &id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_disk_warns_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FailingStore::default());
    let (ctx, human) = context_with(
        common::config(&dir),
        Arc::new(ScriptedMemory::fixed(0.5)),
        Some(store.clone() as Arc<dyn SegmentStore>),
    );
    ctx.begin_command("build", None).unwrap();

    ctx.output().info("first", LogMeta::new());
    // Let the writer hit the disk at least once
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ctx.sessions().is_disabled() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ctx.sessions().is_disabled());

    for i in 0..1000 {
        ctx.output().info(format!("step {i}"), LogMeta::new());
    }
    ctx.finish_command().await;

    let warnings = human
        .lines()
        .into_iter()
        .filter(|l| l.contains("session logging disabled"))
        .count();
    assert_eq!(warnings, 1);
    assert_eq!(ctx.ledger().count(FailureClass::SessionWrite), 1);
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_disk_does_not_block_callers() {
    let dir = TempDir::new().unwrap();
    let mut config = common::config(&dir);
    config.session.shutdown_timeout_ms = 100;
    let store = Arc::new(StalledStore::default());
    let (ctx, human) = context_with(
        config,
        Arc::new(ScriptedMemory::fixed(0.5)),
        Some(store.clone() as Arc<dyn SegmentStore>),
    );
    ctx.begin_command("build", None).unwrap();

    let mut slowest = Duration::ZERO;
    for i in 0..2_000 {
        let started = Instant::now();
        ctx.output().info(format!("step {i}"), LogMeta::new());
        slowest = slowest.max(started.elapsed());
    }
    assert!(slowest < Duration::from_millis(10), "slowest call took {slowest:?}");
    assert_eq!(human.lines().len(), 2_000);

    let started = Instant::now();
    let report = ctx.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.sessions, 1);
    // Queued records and the batch stuck in the store are both counted
    assert_eq!(report.dropped_records(), 2_000);
    assert!(store.calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_redacted_payload_on_disk() {
    let dir = TempDir::new().unwrap();
    let (ctx, _human) = context_with(
        common::config(&dir),
        Arc::new(ScriptedMemory::fixed(0.5)),
        None,
    );
    let id = ctx.begin_command("login", None).unwrap();
    ctx.output().info(
        "authenticated",
        LogMeta::new().with_payload(serde_json::json!({"user": "ana", "password": "hunter2"})),
    );
    ctx.finish_command().await;

    let records = load_session(dir.path(), "login", &id).await.unwrap();
    let payload = records[0].payload().unwrap();
    assert_eq!(payload["user"], "ana");
    assert_eq!(payload["password"], "[REDACTED]");
}
