//! Error types for the test notifier
//!
//! Every error is fatal for a run. Messages name the variable, command or
//! relay step involved so a failing hook is easy to diagnose from its log.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test notifier
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Missing required environment variable {0}")]
    MissingConfiguration(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidConfiguration { name: String, reason: String },

    #[error("Invalid settings file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Invocation Errors ===
    #[error("Failed to start test command '{command}': {source}")]
    InvocationFailure {
        command: String,
        #[source]
        source: io::Error,
    },

    // === Mail Relay Errors ===
    #[error("Mail relay {addr} unreachable: {source}")]
    RelayUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Mail relay rejected {command}: {code} {message}")]
    RelayRejected {
        command: String,
        code: u16,
        message: String,
    },

    #[error("Mail relay closed the connection during {0}")]
    RelayClosed(String),

    // === Timeout Errors ===
    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create an invalid configuration error for a named variable
    pub fn invalid_config(name: &str, reason: impl ToString) -> Self {
        Self::InvalidConfiguration {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a relay rejection error
    pub fn relay_rejected(command: &str, code: u16, message: &str) -> Self {
        Self::RelayRejected {
            command: command.to_string(),
            code,
            message: message.to_string(),
        }
    }

    /// Create a timeout error for a pipeline stage
    pub fn timeout(stage: &str, secs: u64) -> Self {
        Self::Timeout {
            stage: stage.to_string(),
            secs,
        }
    }

    /// Whether this error belongs to the send-failure class
    ///
    /// A relay timeout counts as a send failure too.
    pub fn is_send_failure(&self) -> bool {
        match self {
            Error::RelayUnreachable { .. } | Error::RelayRejected { .. } | Error::RelayClosed(_) => {
                true
            }
            Error::Timeout { stage, .. } => stage == super::config::RELAY_STAGE,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failure_class() {
        assert!(Error::RelayClosed("DATA".into()).is_send_failure());
        assert!(Error::relay_rejected("RCPT TO", 550, "no such user").is_send_failure());
        assert!(Error::timeout(crate::common::config::RELAY_STAGE, 5).is_send_failure());
        assert!(!Error::timeout(crate::common::config::TEST_RUN_STAGE, 5).is_send_failure());
        assert!(!Error::MissingConfiguration("X".into()).is_send_failure());
    }

    #[test]
    fn test_messages_name_the_culprit() {
        let e = Error::MissingConfiguration("OCRA_TESTS__MAIL_TO".into());
        assert!(e.to_string().contains("OCRA_TESTS__MAIL_TO"));

        let e = Error::relay_rejected("MAIL FROM", 553, "sender refused");
        assert_eq!(e.to_string(), "Mail relay rejected MAIL FROM: 553 sender refused");
    }
}
