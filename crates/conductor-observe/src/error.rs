//! Error types for the observability layer
//!
//! Logging calls never return these to their callers. They travel to the
//! [`FailureLedger`](crate::ledger::FailureLedger), which turns the first
//! occurrence of each [`FailureClass`] into one operator-facing line.

use conductor_config::ConfigError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::id::IdError;

/// Result alias used throughout the crate
pub type ObserveResult<T> = Result<T, ObserveError>;

#[derive(Debug, Error)]
pub enum ObserveError {
    /// Memory reading could not be taken
    #[error("memory monitor unavailable: {0}")]
    MonitorUnavailable(String),

    /// Session segment could not be created or appended to
    #[error("session write failed for {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A new segment could not be opened after the size cap was crossed
    #[error("session rotation failed for {path}: {source}")]
    RotationFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Per-session write queue is full
    #[error("session queue overflow: {depth}/{max} records")]
    QueueOverflow { depth: usize, max: usize },

    /// A message bound for the protocol channel is not valid JSON-RPC 2.0,
    /// or the channel has already latched closed
    #[error("protocol compliance violation: {0}")]
    ProtocolComplianceViolation(String),

    /// Session or command identifier failed validation
    #[error(transparent)]
    InvalidIdentifier(#[from] IdError),

    /// Reading persisted sessions failed
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ObserveError {
    /// Whether the layer keeps running in a degraded mode after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::MonitorUnavailable(_)
            | Self::WriteFailure { .. }
            | Self::RotationFailure { .. }
            | Self::QueueOverflow { .. }
            | Self::Read { .. } => true,
            Self::ProtocolComplianceViolation(_)
            | Self::InvalidIdentifier(_)
            | Self::Config(_) => false,
        }
    }

    /// Short category string for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MonitorUnavailable(_) => "monitor",
            Self::WriteFailure { .. } => "write",
            Self::RotationFailure { .. } => "rotation",
            Self::QueueOverflow { .. } => "overflow",
            Self::ProtocolComplianceViolation(_) => "protocol",
            Self::InvalidIdentifier(_) => "identifier",
            Self::Read { .. } => "read",
            Self::Config(_) => "config",
        }
    }

    /// Failure class surfaced to the operator, if any
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::MonitorUnavailable(_) => Some(FailureClass::MonitorUnavailable),
            Self::WriteFailure { .. } => Some(FailureClass::SessionWrite),
            Self::RotationFailure { .. } => Some(FailureClass::SessionRotation),
            Self::QueueOverflow { .. } => Some(FailureClass::QueueOverflow),
            _ => None,
        }
    }
}

/// Internal failures that are reported to the operator at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    MonitorUnavailable,
    SessionWrite,
    SessionRotation,
    QueueOverflow,
}

impl FailureClass {
    pub const ALL: [FailureClass; 4] = [
        FailureClass::MonitorUnavailable,
        FailureClass::SessionWrite,
        FailureClass::SessionRotation,
        FailureClass::QueueOverflow,
    ];

    pub(crate) const fn index(self) -> usize {
        match self {
            FailureClass::MonitorUnavailable => 0,
            FailureClass::SessionWrite => 1,
            FailureClass::SessionRotation => 2,
            FailureClass::QueueOverflow => 3,
        }
    }

    /// The single line shown on the human stream
    pub fn operator_message(self) -> &'static str {
        match self {
            FailureClass::MonitorUnavailable => {
                "memory monitor unavailable: holding last known pressure"
            }
            FailureClass::SessionWrite => "session logging disabled: disk write failed",
            FailureClass::SessionRotation => "session logging disabled: segment rotation failed",
            FailureClass::QueueOverflow => "session logging shedding records: write queue full",
        }
    }
}
