//! Diagnostic output never reaches the protocol stream

mod common;

use common::{context_with, ScriptedMemory, SharedBuffer};
use conductor_observe::{
    Direction, LogMeta, ObserveError, ProtocolChannel, ProtocolMessage, TierLevel,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const LOGGING_THREADS: usize = 8;
const CALLS_PER_THREAD: usize = 1_250;
const PROTOCOL_MESSAGES: usize = 500;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_logging_leaves_protocol_stream_pure() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedMemory::new([0.5]));
    let (ctx, human) = context_with(common::config(&dir), source.clone(), None);
    let ctx = Arc::new(ctx);
    ctx.begin_command("serve", None).unwrap();

    let wire = SharedBuffer::default();
    let channel = Arc::new(ProtocolChannel::new(wire.clone()));

    let loggers: Vec<_> = (0..LOGGING_THREADS)
        .map(|t| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for i in 0..CALLS_PER_THREAD {
                    let output = ctx.output();
                    match i % 4 {
                        0 => output.info(format!("t{t} call {i}"), LogMeta::new()),
                        1 => output.warning(format!("t{t} call {i}"), LogMeta::new()),
                        2 => output.debug_session(
                            conductor_observe::Level::Debug,
                            "{\"jsonrpc\":\"2.0\",\"method\":\"fake\"}",
                            LogMeta::new(),
                        ),
                        _ => {
                            let op = output.start_operation("step", Some(2), LogMeta::new());
                            output.update_progress(&op, 1, None);
                            output.complete_operation(
                                &op,
                                conductor_observe::OperationOutcome::Succeeded,
                                LogMeta::new(),
                            );
                        }
                    }
                    // Walk the tiers while logging
                    if t == 0 && i % 250 == 0 {
                        ctx.probe();
                    }
                }
            })
        })
        .collect();

    // Pressure changes mid-run
    source.push(0.992);
    source.push(0.3);

    let transport = {
        let ctx = Arc::clone(&ctx);
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for n in 0..PROTOCOL_MESSAGES {
                let request = ProtocolMessage::request(n as u64, "echo", Some(json!({ "n": n })));
                ctx.tracer().wrap_inbound(&request);
                let response = ProtocolMessage::response(json!(n as u64), json!({ "n": n }));
                ctx.tracer().wrap_outbound(&response, None);
                channel.send(&response).unwrap();
            }
        })
    };

    for handle in loggers {
        handle.join().unwrap();
    }
    transport.join().unwrap();
    ctx.shutdown().await;

    assert!(!channel.is_halted());
    assert_eq!(channel.messages_sent(), PROTOCOL_MESSAGES as u64);
    let lines = wire.lines();
    assert_eq!(lines.len(), PROTOCOL_MESSAGES);
    for line in &lines {
        let message = ProtocolMessage::parse_line(line).unwrap();
        assert!(message.is_response());
    }
    assert!(!human.is_empty());
}

#[test]
fn test_stray_bytes_halt_the_channel() {
    let wire = SharedBuffer::default();
    let channel = ProtocolChannel::new(wire.clone());

    channel
        .send(&ProtocolMessage::notification("ready", None))
        .unwrap();
    let err = channel.send_raw(b"\xE2\x84\xB9 loading config\n").unwrap_err();
    assert!(matches!(err, ObserveError::ProtocolComplianceViolation(_)));
    assert!(!err.is_recoverable());

    // Latched closed, even for valid messages
    assert!(channel.is_halted());
    assert!(channel
        .send(&ProtocolMessage::notification("ready", None))
        .is_err());
    assert_eq!(wire.lines().len(), 1);
}

#[test]
fn test_responses_share_request_correlation() {
    let dir = TempDir::new().unwrap();
    let (ctx, _human) = context_with(
        common::config(&dir),
        Arc::new(ScriptedMemory::fixed(0.2)),
        None,
    );
    assert_eq!(ctx.probe().1, TierLevel::Normal);

    let request = ProtocolMessage::request("abc", "ping", None);
    let inbound = ctx.tracer().wrap_inbound(&request);
    let response = ProtocolMessage::response(json!("abc"), json!("pong"));
    assert_eq!(ctx.tracer().wrap_outbound(&response, None), inbound);
    assert_eq!(
        ctx.tracer().lookup(Direction::Outbound, &response.key().unwrap()),
        Some(inbound)
    );
}
