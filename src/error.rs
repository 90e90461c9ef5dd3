//! Error types for the email importer.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a mailbox transport.
///
/// `Clone` because the same error is fanned out to every lifecycle
/// subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Could not connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("Command {command} rejected: {reason}")]
    Rejected { command: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Errors surfaced by the high-level client operations.
///
/// Each operation variant keeps the transport error that caused it as its
/// source, unmodified.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection attempt failed: {0}")]
    Connect(#[source] TransportError),

    #[error("Failed to open mailbox {mailbox}: {source}")]
    OpenMailbox {
        mailbox: String,
        #[source]
        source: TransportError,
    },

    #[error("Fetch failed: {0}")]
    Fetch(#[source] TransportError),

    #[error("Failed to mark messages as read: {0}")]
    SetFlags(#[source] TransportError),

    #[error("Failed to list mailboxes: {0}")]
    ListMailboxes(#[source] TransportError),

    #[error("Session ended before it became ready")]
    SessionEnded,

    #[error("Operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Decode task failed: {0}")]
    DecodeTask(String),
}

impl MailError {
    /// The transport error behind this failure, if there is one.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            MailError::Connect(e)
            | MailError::Fetch(e)
            | MailError::SetFlags(e)
            | MailError::ListMailboxes(e) => Some(e),
            MailError::OpenMailbox { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
