//! `cond serve`: stdio JSON-RPC host
//!
//! stdout belongs to the [`ProtocolChannel`]; human output is moved to
//! stderr before the context is built. Every message is correlated, and the
//! exchange is logged to the session file, never to stdout.

use anyhow::{Context, Result};
use conductor_config::{HumanStream, ObserveConfig};
use conductor_observe::{
    Component, CorrelationId, Level, LogMeta, ObserveContext, ProtocolChannel, ProtocolMessage,
};
use serde_json::{json, Value};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::Interrupted;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Counts for one serve loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServeSummary {
    pub received: u64,
    pub replied: u64,
    pub rejected: u64,
}

pub async fn execute(mut config: ObserveConfig) -> Result<()> {
    config.output.human_stream = HumanStream::Stderr;
    let ctx = ObserveContext::builder(config)
        .build()
        .context("failed to set up logging")?;
    ctx.start_background();
    ctx.begin_command("serve", None)?;

    let channel = ProtocolChannel::new(std::io::stdout());
    let outcome = tokio::select! {
        result = serve(&ctx, BufReader::new(tokio::io::stdin()), &channel) => result.map(Some),
        signal = super::shutdown_signal() => {
            ctx.output().warning(
                format!("received {signal}, flushing sessions"),
                LogMeta::component(Component::Command),
            );
            Err(Interrupted(signal).into())
        }
    };

    ctx.finish_command().await;
    ctx.shutdown().await;
    if let Some(summary) = outcome? {
        debug!(?summary, "stdio session ended");
    }
    Ok(())
}

/// Answer requests from `input` until EOF
///
/// Returns early only when the channel reports a protocol violation.
pub async fn serve<R, W>(
    ctx: &ObserveContext,
    input: R,
    channel: &ProtocolChannel<W>,
) -> Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    let mut summary = ServeSummary::default();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        summary.received += 1;
        let Some(reply) = handle_line(ctx, &line, &mut summary) else {
            continue;
        };
        ctx.tracer().wrap_outbound(&reply, None);
        channel.send(&reply).context("protocol channel closed")?;
        summary.replied += 1;
    }
    Ok(summary)
}

fn handle_line(ctx: &ObserveContext, line: &str, summary: &mut ServeSummary) -> Option<ProtocolMessage> {
    let out = ctx.output();
    let meta = LogMeta::component(Component::Protocol);

    let message: ProtocolMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            summary.rejected += 1;
            out.warning(format!("unparseable message: {e}"), meta);
            return Some(ProtocolMessage::error_response(Value::Null, PARSE_ERROR, "Parse error"));
        }
    };
    if let Err(reason) = message.validate() {
        summary.rejected += 1;
        out.warning(format!("invalid request: {reason}"), meta);
        let id = match message.id {
            Some(id @ (Value::Number(_) | Value::String(_))) => id,
            _ => Value::Null,
        };
        return Some(ProtocolMessage::error_response(id, INVALID_REQUEST, "Invalid Request"));
    }

    let correlation = ctx.tracer().wrap_inbound(&message);
    let meta = meta.with_correlation(correlation.clone());

    if message.is_response() {
        out.debug_session(Level::Debug, "ignoring client response", meta);
        return None;
    }

    let method = message.method.clone().unwrap_or_default();
    out.info(format!("← {method}"), meta.clone().with_payload(json!({ "params": message.params })));

    // Notifications get no reply
    let id = message.id.clone()?;
    let reply = dispatch(ctx, &method, message.params.clone(), id, &correlation);
    let outcome = if reply.error.is_some() { Level::Warning } else { Level::Info };
    out.log(outcome, &format!("→ {method}"), meta);
    Some(reply)
}

fn dispatch(
    ctx: &ObserveContext,
    method: &str,
    params: Option<Value>,
    id: Value,
    correlation: &CorrelationId,
) -> ProtocolMessage {
    match method {
        "ping" => ProtocolMessage::response(id, json!("pong")),
        "echo" => ProtocolMessage::response(id, params.unwrap_or(Value::Null)),
        "status" => {
            let status = serde_json::to_value(ctx.controller().status()).unwrap_or(Value::Null);
            ProtocolMessage::response(
                id,
                json!({ "tier": status, "correlation": ctx.tracer().export(correlation) }),
            )
        }
        other => ProtocolMessage::error_response(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}
