//! Error types for the hands-free session controller

use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur in the session controller or its collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// The radio link refused to issue a command
    #[error("Link command {operation} rejected for {device}")]
    LinkIssuance { operation: String, device: String },

    /// Remote/IPC failure talking to the telephony side
    #[error("Telephony unavailable: {message}")]
    Telephony { message: String },

    /// Malformed notification or AT argument
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The session actor is gone
    #[error("Session mailbox closed")]
    MailboxClosed,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a link issuance error
    pub fn link(operation: impl Into<String>, device: impl ToString) -> Self {
        Self::LinkIssuance {
            operation: operation.into(),
            device: device.to_string(),
        }
    }

    /// Create a telephony (IPC) error
    pub fn telephony(message: impl Into<String>) -> Self {
        Self::Telephony {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for SessionError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}
