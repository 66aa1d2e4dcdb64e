//! Log records and their session-file line format
//!
//! One record per line:
//!
//! ```text
//! INFO|message|corr=<id>|component=<tag>|ts=<rfc3339>|session=<id>[|payload=<json>]
//! ```
//!
//! Messages escape `\`, `|`, CR and LF so a line always holds exactly one
//! record. Absent correlation or session IDs are written as `-`. The JSON
//! payload, when present, is always the last field.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::component::Component;
use crate::id::{CorrelationId, SessionId};
use crate::redact::{redact_text, redact_value};

/// Message used for the record that marks a segment boundary
pub const ROTATION_MARKER: &str = "segment rotated";
/// Message used when shutdown abandons queued records
pub const TRUNCATION_MARKER: &str = "session truncated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warning => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "DEBUG" => Some(Level::Debug),
            "INFO" => Some(Level::Info),
            "SUCCESS" => Some(Level::Success),
            "WARN" => Some(Level::Warning),
            "ERROR" => Some(Level::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single log record
///
/// Immutable once built: the `with_*` methods consume the record, and
/// message and payload are redacted on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    level: Level,
    message: String,
    timestamp: DateTime<Utc>,
    correlation: Option<CorrelationId>,
    component: Component,
    session: Option<SessionId>,
    payload: Option<Value>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl AsRef<str>, component: Component) -> Self {
        Self {
            level,
            message: redact_text(message.as_ref()).into_owned(),
            timestamp: Utc::now(),
            correlation: None,
            component,
            session: None,
            payload: None,
        }
    }

    pub fn with_correlation(mut self, id: Option<CorrelationId>) -> Self {
        self.correlation = id;
        self
    }

    pub fn with_session(mut self, id: SessionId) -> Self {
        self.session = Some(id);
        self
    }

    pub fn with_payload(mut self, payload: Option<&Value>) -> Self {
        self.payload = payload.map(redact_value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Marker written as the first record of a new segment
    pub fn rotation_marker(session: SessionId, segment: u32) -> Self {
        let payload = serde_json::json!({ "segment": segment });
        Self::new(Level::Info, ROTATION_MARKER, Component::Session)
            .with_session(session)
            .with_payload(Some(&payload))
    }

    /// Marker appended when shutdown drops queued records
    pub fn truncation_marker(session: SessionId, dropped: u64) -> Self {
        let payload = serde_json::json!({ "dropped": dropped });
        Self::new(Level::Warning, TRUNCATION_MARKER, Component::Session)
            .with_session(session)
            .with_payload(Some(&payload))
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation(&self) -> Option<&CorrelationId> {
        self.correlation.as_ref()
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Whether this is a rotation or truncation marker rather than a
    /// record produced by a caller
    pub fn is_marker(&self) -> bool {
        self.component == Component::Session
            && (self.message == ROTATION_MARKER || self.message == TRUNCATION_MARKER)
    }

    /// Serialize to one line, including the trailing newline
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(self.message.len() + 96);
        line.push_str(self.level.tag());
        line.push('|');
        escape_into(&self.message, &mut line);
        line.push_str("|corr=");
        line.push_str(self.correlation.as_ref().map_or("-", |c| c.as_str()));
        line.push_str("|component=");
        line.push_str(self.component.tag());
        line.push_str("|ts=");
        line.push_str(
            &self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        );
        line.push_str("|session=");
        line.push_str(self.session.as_ref().map_or("-", |s| s.as_str()));
        if let Some(payload) = &self.payload {
            line.push_str("|payload=");
            line.push_str(&payload.to_string());
        }
        line.push('\n');
        line
    }

    /// Parse one line produced by [`LogRecord::to_line`]
    ///
    /// Parsed records are taken as already redacted.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (level, rest) = line.split_once('|').ok_or(ParseError::MissingField("message"))?;
        let level = Level::from_tag(level).ok_or_else(|| ParseError::BadLevel(level.to_string()))?;
        let (message, mut rest) = rest.split_once('|').ok_or(ParseError::MissingField("corr"))?;
        let message = unescape(message)?;

        let mut correlation = None;
        let mut component = None;
        let mut timestamp = None;
        let mut session = None;
        let mut payload = None;

        while !rest.is_empty() {
            if let Some(json) = rest.strip_prefix("payload=") {
                payload = Some(
                    serde_json::from_str(json).map_err(|e| ParseError::BadPayload(e.to_string()))?,
                );
                break;
            }
            let (field, tail) = rest.split_once('|').unwrap_or((rest, ""));
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| ParseError::BadField(field.to_string()))?;
            match key {
                "corr" if value != "-" => {
                    correlation = Some(
                        CorrelationId::parse(value)
                            .map_err(|_| ParseError::BadField(field.to_string()))?,
                    )
                }
                "component" => {
                    component = Some(
                        value
                            .parse::<Component>()
                            .map_err(|_| ParseError::BadField(field.to_string()))?,
                    )
                }
                "ts" => {
                    timestamp = Some(
                        DateTime::parse_from_rfc3339(value)
                            .map_err(|_| ParseError::BadField(field.to_string()))?
                            .to_utc(),
                    )
                }
                "session" if value != "-" => {
                    session = Some(
                        SessionId::parse(value)
                            .map_err(|_| ParseError::BadField(field.to_string()))?,
                    )
                }
                "corr" | "session" => {}
                _ => return Err(ParseError::BadField(field.to_string())),
            }
            rest = tail;
        }

        Ok(Self {
            level,
            message,
            timestamp: timestamp.ok_or(ParseError::MissingField("ts"))?,
            correlation,
            component: component.ok_or(ParseError::MissingField("component"))?,
            session,
            payload,
        })
    }
}

/// Errors from [`LogRecord::parse_line`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("unknown level: {0}")]
    BadLevel(String),
    #[error("malformed field: {0}")]
    BadField(String),
    #[error("invalid escape sequence in message")]
    BadEscape,
    #[error("invalid payload: {0}")]
    BadPayload(String),
}

fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\p"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn unescape(text: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('p') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(ParseError::BadEscape),
        }
    }
    Ok(out)
}
