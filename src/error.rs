//! Error handling types for dap-bridge
//!
//! One error enum covers every layer: backend setup, the transport, the
//! backend's own error responses, caller input validation, cancellation and
//! registry lookups.

use std::fmt;

use thiserror::Error;

use crate::retry::RetryError;

/// Comprehensive error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Backend executable could not be located on PATH
    #[error("could not find '{command}' executable: {source}")]
    ExecutableNotFound {
        command: String,
        #[source]
        source: which::Error,
    },

    /// Backend process failed to start
    #[error("could not start backend process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Backend did not announce its listen address in time
    #[error("timed out after {0:?} waiting for backend listen address")]
    AnnounceTimeout(std::time::Duration),

    /// Backend stdout ended before the listen address was announced
    #[error("backend output ended before announcing a listen address")]
    AnnounceMissing,

    /// Connecting to the announced address exhausted the retry budget
    #[error("could not connect to backend at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: RetryError<std::io::Error>,
    },

    /// Whole backend launch sequence exhausted its retry budget
    #[error("failed to launch backend after retries: {0}")]
    Launch(#[source] Box<RetryError<BridgeError>>),

    /// Writing a request to the connection failed
    #[error("error writing DAP message: {0}")]
    Write(#[source] std::io::Error),

    /// Reading or parsing an incoming message failed
    #[error("error reading DAP message: {0}")]
    Decode(#[source] std::io::Error),

    /// The read loop ended while a call was waiting
    #[error("transport closed while waiting for '{command}' response")]
    TransportClosed { command: String },

    /// The backend answered with an error response
    #[error("{operation} failed: {message}{}", error_id_suffix(.error_id))]
    Protocol {
        operation: String,
        message: String,
        error_id: Option<i64>,
    },

    /// The response did not have the shape the operation expects
    #[error("unexpected response to '{expected}': {detail}")]
    UnexpectedResponse { expected: String, detail: String },

    /// Caller-supplied arguments were rejected before any request was sent
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The call's deadline elapsed before a response arrived
    #[error("deadline elapsed while waiting for '{command}' response")]
    DeadlineElapsed { command: String },

    /// The caller's cancellation token fired before a response arrived
    #[error("call '{command}' cancelled")]
    Cancelled { command: String },

    /// The session has been stopped and no longer accepts calls
    #[error("session {0} has been stopped")]
    SessionStopped(String),

    /// No session is registered under the identifier
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The registry has been shut down
    #[error("session registry has been shut down")]
    RegistryClosed,

    /// Configuration error
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of a request payload failed
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

fn error_id_suffix(error_id: &Option<i64>) -> ErrorIdSuffix {
    ErrorIdSuffix(*error_id)
}

struct ErrorIdSuffix(Option<i64>);

impl fmt::Display for ErrorIdSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, " (id: {})", id),
            None => Ok(()),
        }
    }
}

/// Helper functions for common error patterns
impl BridgeError {
    /// Create a caller-input validation error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        BridgeError::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create an unexpected-response error
    pub fn unexpected(expected: impl Into<String>, detail: impl Into<String>) -> Self {
        BridgeError::UnexpectedResponse {
            expected: expected.into(),
            detail: detail.into(),
        }
    }

    /// True for errors caused by the caller's deadline or cancellation token.
    ///
    /// Lets callers tell "gave up waiting" apart from backend or transport
    /// failures when deciding whether to retry.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            BridgeError::DeadlineElapsed { .. } | BridgeError::Cancelled { .. }
        )
    }

    /// True for errors that leave the session unusable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            BridgeError::Write(_)
                | BridgeError::Decode(_)
                | BridgeError::TransportClosed { .. }
                | BridgeError::SessionStopped(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_includes_message_and_id() {
        let error = BridgeError::Protocol {
            operation: "launch".to_string(),
            message: "could not launch process: not an executable file".to_string(),
            error_id: Some(3000),
        };

        assert_eq!(
            error.to_string(),
            "launch failed: could not launch process: not an executable file (id: 3000)"
        );
    }

    #[test]
    fn protocol_error_without_id_omits_suffix() {
        let error = BridgeError::Protocol {
            operation: "continue".to_string(),
            message: "unknown thread".to_string(),
            error_id: None,
        };

        assert_eq!(error.to_string(), "continue failed: unknown thread");
    }

    #[test]
    fn cancellation_errors_are_distinguishable() {
        assert!(
            BridgeError::DeadlineElapsed {
                command: "threads".into()
            }
            .is_cancellation()
        );
        assert!(
            BridgeError::Cancelled {
                command: "threads".into()
            }
            .is_cancellation()
        );
        assert!(!BridgeError::invalid_input("no breakpoints provided").is_cancellation());
        assert!(
            !BridgeError::Protocol {
                operation: "next".into(),
                message: "boom".into(),
                error_id: None,
            }
            .is_cancellation()
        );
    }

    #[test]
    fn transport_errors_are_fatal_to_session() {
        let error = BridgeError::Decode(std::io::Error::other("bad header"));
        assert!(error.is_fatal_to_session());
        assert!(!BridgeError::invalid_input("x").is_fatal_to_session());
    }
}
