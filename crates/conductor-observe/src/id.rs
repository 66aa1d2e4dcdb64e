//! Session and correlation identifiers
//!
//! Session IDs: `{HHMMSS}-{8-char-hash}`, e.g. `153000-a1b2c3d4`.
//! Dispatchers may also supply their own IDs (`init`, `build-42`) as long
//! as they are safe to use as a file name component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 96;

/// Errors raised when validating identifiers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },
    #[error("{kind} is longer than {max} characters: {len}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{kind} contains invalid character {ch:?}: {value}")]
    InvalidChar {
        kind: &'static str,
        value: String,
        ch: char,
    },
    #[error("{kind} must not start with '.': {value}")]
    LeadingDot { kind: &'static str, value: String },
    #[error("session id must not end in '.<digits>' (reserved for segments): {0}")]
    SegmentSuffix(String),
}

/// Check that `value` can be used as a single path component
pub(crate) fn validate_name(kind: &'static str, value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if value.len() > MAX_NAME_LEN {
        return Err(IdError::TooLong {
            kind,
            len: value.len(),
            max: MAX_NAME_LEN,
        });
    }
    if value.starts_with('.') {
        return Err(IdError::LeadingDot {
            kind,
            value: value.to_string(),
        });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(IdError::InvalidChar {
            kind,
            value: value.to_string(),
            ch,
        });
    }
    Ok(())
}

/// Validate a command name used as the session directory
pub fn validate_command_name(command: &str) -> Result<(), IdError> {
    validate_name("command name", command)
}

/// Identifier of one command invocation's session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SessionId::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl SessionId {
    /// Generate a fresh session ID for the given timestamp
    pub fn generate(timestamp: DateTime<Utc>) -> Self {
        let time = timestamp.format("%H%M%S");
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or(0);
        let random: u64 = rand::random();
        let hash = blake3::hash(format!("{nanos}{random}").as_bytes());
        Self(format!("{time}-{}", &hash.to_hex()[..8]))
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        validate_name("session id", s)?;
        // `<id>.<n>.log` names rotated segment n
        if let Some((_, last)) = s.rsplit_once('.') {
            if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
                return Err(IdError::SegmentSuffix(s.to_string()));
            }
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::parse(s)
    }
}

/// Identifier tying records across components and the protocol boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CorrelationId::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        validate_name("correlation id", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading `len` characters, used as the human-readable suffix
    pub fn short(&self, len: usize) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(len)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let ts = DateTime::parse_from_rfc3339("2026-01-04T15:30:07Z")
            .unwrap()
            .to_utc();
        let id = SessionId::generate(ts);

        assert!(id.as_str().starts_with("153007-"));
        let hash = id.as_str().split('-').last().unwrap();
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_id_uniqueness() {
        let ts = Utc::now();
        assert_ne!(SessionId::generate(ts), SessionId::generate(ts));
    }

    #[test]
    fn test_dispatcher_supplied_ids() {
        assert!(SessionId::parse("init").is_ok());
        assert!(SessionId::parse("build_42.retry-1").is_ok());
        assert!(SessionId::parse("v1.2a").is_ok());
    }

    #[test]
    fn test_rejects_segment_like_suffix() {
        for id in ["retry.1", "v1.2", "init.007"] {
            assert!(matches!(
                SessionId::parse(id),
                Err(IdError::SegmentSuffix(_))
            ));
        }
        let bad: Result<SessionId, _> = serde_json::from_str("\"retry.1\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert!(matches!(
            SessionId::parse("../../../etc/passwd"),
            Err(IdError::LeadingDot { .. })
        ));
        assert!(matches!(
            SessionId::parse("a/b"),
            Err(IdError::InvalidChar { ch: '/', .. })
        ));
        assert!(validate_command_name("run|x").is_err());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<SessionId, _> = serde_json::from_str("\"init\"");
        assert!(ok.is_ok());
        let bad: Result<SessionId, _> = serde_json::from_str("\"a b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_correlation_short() {
        let id = CorrelationId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert_eq!(id.short(8).len(), 8);
        assert_eq!(id.short(100), id.as_str());
        assert!(id.as_str().starts_with(id.short(8)));
    }
}
