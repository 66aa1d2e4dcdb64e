//! Conductor CLI library
//!
//! The `cond` binary is a thin command dispatcher: it builds one
//! [`conductor_observe::ObserveContext`] per process, hands the command name
//! and session id to it, and routes protocol traffic through a
//! [`conductor_observe::ProtocolChannel`] it owns separately.

pub mod cli;
pub mod commands;
pub mod config;

use conductor_observe::ObserveError;

/// Exit code for a write that would have corrupted the protocol stream
pub const EXIT_PROTOCOL_VIOLATION: u8 = 70;

/// Exit code after SIGINT/SIGTERM, once sessions are flushed
pub const EXIT_INTERRUPTED: u8 = 130;

/// A command stopped early by a termination signal
#[derive(Debug, thiserror::Error)]
#[error("interrupted by {0}")]
pub struct Interrupted(pub &'static str);

/// Whether `err` is a clean stop after a termination signal
pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Interrupted>().is_some()
}

/// Whether `err` was caused by a protocol compliance violation
pub fn is_protocol_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ObserveError>(),
            Some(ObserveError::ProtocolComplianceViolation(_))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_detects_wrapped_violation() {
        let err: anyhow::Result<()> =
            Err(ObserveError::ProtocolComplianceViolation("stray bytes".into()))
                .context("serving stdio");
        assert!(is_protocol_violation(&err.unwrap_err()));

        let other = anyhow::anyhow!("disk full");
        assert!(!is_protocol_violation(&other));
    }

    #[test]
    fn test_detects_interrupt() {
        let err = anyhow::Error::new(Interrupted("SIGTERM"));
        assert!(is_interrupted(&err));
        assert_eq!(err.to_string(), "interrupted by SIGTERM");
        assert!(!is_interrupted(&anyhow::anyhow!("disk full")));
    }
}
