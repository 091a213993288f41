//! Error types for replication operations
//!
//! Every fallible operation in the crate returns [`Result`]. The variants of
//! [`ReplicationError`] are the error kinds callers branch on: existence
//! checks look for [`ReplicationError::NotFound`], create-if-absent paths
//! look for [`ReplicationError::Conflict`], and the transfer orchestrator
//! reports a stopped job as [`ReplicationError::Cancelled`].

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// Credentials were rejected by the registry or its token service
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The operation is not permitted for the credential in use
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The resource is absent upstream
    #[error("not found: {0}")]
    NotFound(String),
    /// The resource already exists upstream
    #[error("conflict: {0}")]
    Conflict(String),
    /// Network, DNS, TLS or I/O failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Unexpected response: bad media type, malformed JSON, digest mismatch
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Bad URL, unknown registry type, missing credential, invalid filter
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The job was stopped through its stop probe
    #[error("the job is stopped")]
    Cancelled,
    /// Non-recoverable misconfiguration
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Discriminant of [`ReplicationError`] without its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Transport,
    Protocol,
    InvalidArgument,
    Cancelled,
    Fatal,
}

impl ReplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicationError::Unauthorized(_) => ErrorKind::Unauthorized,
            ReplicationError::Forbidden(_) => ErrorKind::Forbidden,
            ReplicationError::NotFound(_) => ErrorKind::NotFound,
            ReplicationError::Conflict(_) => ErrorKind::Conflict,
            ReplicationError::Transport(_) => ErrorKind::Transport,
            ReplicationError::Protocol(_) => ErrorKind::Protocol,
            ReplicationError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ReplicationError::Cancelled => ErrorKind::Cancelled,
            ReplicationError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicationError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReplicationError::Conflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplicationError::Cancelled)
    }

    /// Shorthand for an [`ReplicationError::InvalidArgument`] built from any displayable value
    pub fn invalid(message: impl std::fmt::Display) -> Self {
        ReplicationError::InvalidArgument(message.to_string())
    }

    /// Shorthand for a [`ReplicationError::Protocol`] built from any displayable value
    pub fn protocol(message: impl std::fmt::Display) -> Self {
        ReplicationError::Protocol(message.to_string())
    }

    /// Prefixes the message with context, keeping the kind
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            ReplicationError::Unauthorized(m) => ReplicationError::Unauthorized(format!("{}: {}", context, m)),
            ReplicationError::Forbidden(m) => ReplicationError::Forbidden(format!("{}: {}", context, m)),
            ReplicationError::NotFound(m) => ReplicationError::NotFound(format!("{}: {}", context, m)),
            ReplicationError::Conflict(m) => ReplicationError::Conflict(format!("{}: {}", context, m)),
            ReplicationError::Transport(m) => ReplicationError::Transport(format!("{}: {}", context, m)),
            ReplicationError::Protocol(m) => ReplicationError::Protocol(format!("{}: {}", context, m)),
            ReplicationError::InvalidArgument(m) => {
                ReplicationError::InvalidArgument(format!("{}: {}", context, m))
            }
            ReplicationError::Cancelled => ReplicationError::Cancelled,
            ReplicationError::Fatal(m) => ReplicationError::Fatal(format!("{}: {}", context, m)),
        }
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        ReplicationError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationError::Protocol(format!("malformed JSON: {}", err))
    }
}

impl From<reqwest::Error> for ReplicationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ReplicationError::InvalidArgument(err.to_string())
        } else if err.is_decode() {
            ReplicationError::Protocol(err.to_string())
        } else {
            ReplicationError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for ReplicationError {
    fn from(err: url::ParseError) -> Self {
        ReplicationError::InvalidArgument(format!("invalid URL: {}", err))
    }
}

impl From<reqwest::header::ToStrError> for ReplicationError {
    fn from(err: reqwest::header::ToStrError) -> Self {
        ReplicationError::Protocol(format!("invalid header value: {}", err))
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ReplicationError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        ReplicationError::InvalidArgument(format!("invalid header value: {}", err))
    }
}

impl From<std::string::FromUtf8Error> for ReplicationError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ReplicationError::Protocol(format!("UTF-8 conversion error: {}", err))
    }
}
