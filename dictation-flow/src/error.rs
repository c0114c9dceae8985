use std::time::Duration;

use thiserror::Error;

/// Failures of the outbound calls to the interpretation, submission and report services.
///
/// None of these are fatal to a session: the controller turns them into assistant
/// messages and the operator may retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Invalid response structure: {0}")]
    InvalidResponse(String),

    #[error("No field report generated")]
    EmptyReport,

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// Errors returned to the host driving a session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("a request is already in flight for session {0}")]
    Busy(String),

    #[error("record is not ready to submit")]
    NotReady,

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
