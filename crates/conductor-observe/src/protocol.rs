//! The protocol-compliance channel
//!
//! [`ProtocolChannel`] owns the machine-readable output stream. It accepts
//! only well-formed JSON-RPC 2.0 messages, one per line. Anything else is a
//! [`ObserveError::ProtocolComplianceViolation`]; the channel then latches
//! closed and refuses every later write.
//!
//! Nothing in the logging facade holds a reference to a channel.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::error;

use crate::error::{ObserveError, ObserveResult};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,
}

/// Keep an explicit `null` distinct from an absent field
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Side-table key derived from a message id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKey {
    Number(String),
    Text(String),
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKey::Number(n) => f.write_str(n),
            MessageKey::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl ProtocolMessage {
    fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn response(id: Value, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::empty()
        }
    }

    pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            error: Some(serde_json::json!({ "code": code, "message": message.into() })),
            ..Self::empty()
        }
    }

    /// Parse and validate one line
    pub fn parse_line(line: &str) -> ObserveResult<Self> {
        let message: Self = serde_json::from_str(line.trim_end_matches(['\n', '\r']))
            .map_err(|e| ObserveError::ProtocolComplianceViolation(format!("not JSON-RPC: {e}")))?;
        message
            .validate()
            .map_err(ObserveError::ProtocolComplianceViolation)?;
        Ok(message)
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    /// Side-table key for this message, if it carries a usable id
    pub fn key(&self) -> Option<MessageKey> {
        match self.id.as_ref()? {
            Value::Number(n) => Some(MessageKey::Number(n.to_string())),
            Value::String(s) => Some(MessageKey::Text(s.clone())),
            _ => None,
        }
    }

    /// Structural JSON-RPC 2.0 checks
    pub fn validate(&self) -> Result<(), String> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(format!("unsupported jsonrpc version {:?}", self.jsonrpc));
        }
        match &self.id {
            None | Some(Value::Null) | Some(Value::Number(_)) | Some(Value::String(_)) => {}
            Some(other) => return Err(format!("id must be a string, number or null: {other}")),
        }
        if let Some(params) = &self.params {
            if !(params.is_object() || params.is_array()) {
                return Err("params must be an object or array".into());
            }
        }

        match (&self.method, &self.result, &self.error) {
            (Some(method), None, None) => {
                if method.is_empty() {
                    return Err("method must not be empty".into());
                }
                Ok(())
            }
            (Some(_), _, _) => Err("request must not carry result or error".into()),
            (None, Some(_), Some(_)) => Err("response carries both result and error".into()),
            (None, None, None) => Err("message is neither request nor response".into()),
            (None, result, error) => {
                if self.params.is_some() {
                    return Err("response must not carry params".into());
                }
                if self.id.is_none() {
                    return Err("response requires an id".into());
                }
                if result.is_none() {
                    validate_error_object(error.as_ref())?;
                }
                Ok(())
            }
        }
    }
}

fn validate_error_object(error: Option<&Value>) -> Result<(), String> {
    let Some(Value::Object(obj)) = error else {
        return Err("error must be an object".into());
    };
    if !obj.get("code").map_or(false, Value::is_i64) {
        return Err("error.code must be an integer".into());
    }
    if !obj.get("message").map_or(false, Value::is_string) {
        return Err("error.message must be a string".into());
    }
    Ok(())
}

/// Owner of the protocol output stream
pub struct ProtocolChannel<W: Write + Send> {
    writer: Mutex<W>,
    halted: AtomicBool,
    sent: AtomicU64,
}

impl<W: Write + Send> ProtocolChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            halted: AtomicBool::new(false),
            sent: AtomicU64::new(0),
        }
    }

    /// Write one message as a single line
    pub fn send(&self, message: &ProtocolMessage) -> ObserveResult<()> {
        self.ensure_open()?;
        if let Err(reason) = message.validate() {
            return Err(self.halt(reason));
        }
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.halt(format!("unserializable message: {e}")))?;
        line.push('\n');
        self.write(line.as_bytes())
    }

    /// Forward raw bytes after checking each line is a valid message
    ///
    /// Nothing is written unless every line validates.
    pub fn send_raw(&self, bytes: &[u8]) -> ObserveResult<()> {
        self.ensure_open()?;
        let text = std::str::from_utf8(bytes).map_err(|_| self.halt("payload is not UTF-8".into()))?;
        if !text.ends_with('\n') {
            return Err(self.halt("payload must end with a newline".into()));
        }
        for line in text.lines() {
            if let Err(ObserveError::ProtocolComplianceViolation(reason)) =
                ProtocolMessage::parse_line(line)
            {
                return Err(self.halt(reason));
            }
        }
        self.write(bytes)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn ensure_open(&self) -> ObserveResult<()> {
        if self.is_halted() {
            return Err(ObserveError::ProtocolComplianceViolation(
                "protocol channel halted after an earlier violation".into(),
            ));
        }
        Ok(())
    }

    fn halt(&self, reason: String) -> ObserveError {
        self.halted.store(true, Ordering::Release);
        error!(reason = %reason, "protocol channel halted");
        ObserveError::ProtocolComplianceViolation(reason)
    }

    fn write(&self, bytes: &[u8]) -> ObserveResult<()> {
        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(bytes).and_then(|()| writer.flush()) {
            return Err(self.halt(format!("transport write failed: {e}")));
        }
        let lines = bytes.iter().filter(|b| **b == b'\n').count() as u64;
        self.sent.fetch_add(lines, Ordering::Relaxed);
        Ok(())
    }
}

impl<W: Write + Send> fmt::Debug for ProtocolChannel<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolChannel")
            .field("halted", &self.is_halted())
            .field("sent", &self.messages_sent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> ProtocolChannel<Vec<u8>> {
        ProtocolChannel::new(Vec::new())
    }

    #[test]
    fn test_valid_messages_written_one_per_line() {
        let ch = channel();
        ch.send(&ProtocolMessage::request(1, "ping", None)).unwrap();
        ch.send(&ProtocolMessage::response(json!(1), json!("pong")))
            .unwrap();
        ch.send(&ProtocolMessage::notification("progress", Some(json!({"n": 1}))))
            .unwrap();
        assert_eq!(ch.messages_sent(), 3);

        let out = String::from_utf8(ch.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            ProtocolMessage::parse_line(line).unwrap();
        }
    }

    #[test]
    fn test_invalid_message_latches_closed() {
        let ch = channel();
        let mut bad = ProtocolMessage::request(1, "ping", None);
        bad.jsonrpc = "1.0".into();
        assert!(matches!(
            ch.send(&bad),
            Err(ObserveError::ProtocolComplianceViolation(_))
        ));
        assert!(ch.is_halted());

        let good = ProtocolMessage::request(2, "ping", None);
        assert!(ch.send(&good).is_err());
        assert!(ch.into_inner().is_empty());
    }

    #[test]
    fn test_send_raw_rejects_diagnostic_text() {
        let ch = channel();
        let err = ch.send_raw(b"INFO|hello|corr=-\n").unwrap_err();
        assert!(!err.is_recoverable());
        assert!(ch.is_halted());
        assert!(ch.into_inner().is_empty());
    }

    #[test]
    fn test_send_raw_all_or_nothing() {
        let ch = channel();
        let payload = b"{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\nnot json\n";
        assert!(ch.send_raw(payload).is_err());
        assert!(ch.into_inner().is_empty());

        let ch = channel();
        ch.send_raw(b"{\"jsonrpc\":\"2.0\",\"id\":\"x\",\"result\":null}\n")
            .unwrap();
        assert_eq!(ch.messages_sent(), 1);
    }

    #[test]
    fn test_validation_rules() {
        let cases = [
            (json!({"jsonrpc": "2.0", "id": 1, "method": "m"}), true),
            (json!({"jsonrpc": "2.0", "id": 1, "result": {}}), true),
            (json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "parse"}}), true),
            (json!({"jsonrpc": "2.0", "id": 1}), false),
            (json!({"jsonrpc": "2.0", "id": {}, "method": "m"}), false),
            (json!({"jsonrpc": "2.0", "method": "m", "result": 1}), false),
            (json!({"jsonrpc": "2.0", "id": 1, "result": 1, "error": {"code": 1, "message": "x"}}), false),
            (json!({"jsonrpc": "2.0", "id": 1, "error": {"code": "bad", "message": "x"}}), false),
            (json!({"jsonrpc": "2.0", "result": 1}), false),
            (json!({"jsonrpc": "2.0", "method": "m", "params": 3}), false),
        ];
        for (value, ok) in cases {
            let parsed = ProtocolMessage::parse_line(&value.to_string());
            assert_eq!(parsed.is_ok(), ok, "{value}");
        }
    }

    #[test]
    fn test_message_keys() {
        assert_eq!(
            ProtocolMessage::request(7, "m", None).key(),
            Some(MessageKey::Number("7".into()))
        );
        assert_eq!(
            ProtocolMessage::request("abc", "m", None).key(),
            Some(MessageKey::Text("abc".into()))
        );
        assert_eq!(ProtocolMessage::notification("m", None).key(), None);
        assert!(ProtocolMessage::notification("m", None).is_notification());
    }
}
