//! `cond run`: one command invocation with progress and a session log

use anyhow::{Context, Result};
use conductor_config::ObserveConfig;
use conductor_observe::{
    Component, Level, LogMeta, ObserveContext, OperationId, OperationOutcome, SessionId,
};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::Interrupted;

pub async fn execute(
    config: ObserveConfig,
    command: String,
    steps: u64,
    delay_ms: u64,
    session: Option<String>,
) -> Result<()> {
    let session = session
        .as_deref()
        .map(SessionId::parse)
        .transpose()
        .context("invalid --session")?;

    let ctx = ObserveContext::builder(config)
        .build()
        .context("failed to set up logging")?;
    ctx.start_background();

    let id = ctx
        .begin_command(&command, session)
        .with_context(|| format!("cannot start session for {command:?}"))?;
    debug!(session_id = %id, command, steps, "running command");

    let out = ctx.output();
    out.info(format!("{command}: session {id}"), LogMeta::new());

    let op = out.start_operation(&command, Some(steps), LogMeta::new());
    let interrupted = tokio::select! {
        _ = run_steps(&ctx, &op, steps, delay_ms) => None,
        signal = super::shutdown_signal() => Some(signal),
    };
    let outcome = match interrupted {
        None => OperationOutcome::Succeeded,
        Some(signal) => {
            out.warning(
                format!("received {signal}, flushing session"),
                LogMeta::component(Component::Command),
            );
            OperationOutcome::Failed
        }
    };
    out.complete_operation(&op, outcome, LogMeta::new());

    if let Some(session) = ctx.finish_command().await {
        if session.records_written > 0 {
            out.info(
                format!("session log: {}", session.path.display()),
                LogMeta::component(Component::Session),
            );
        }
    }

    let report = ctx.shutdown().await;
    if report.dropped_records() > 0 {
        out.warning(
            format!("{} session records dropped at shutdown", report.dropped_records()),
            LogMeta::new(),
        );
    }
    match interrupted {
        Some(signal) => Err(Interrupted(signal).into()),
        None => Ok(()),
    }
}

async fn run_steps(ctx: &ObserveContext, op: &OperationId, steps: u64, delay_ms: u64) {
    let out = ctx.output();
    for step in 1..=steps {
        out.debug_session(
            Level::Debug,
            format!("step {step} of {steps}"),
            LogMeta::new().with_payload(json!({ "step": step, "of": steps })),
        );
        out.update_progress(op, step, None);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}
