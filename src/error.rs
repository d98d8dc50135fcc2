//! Error types and status codes for the blocking MQTT facade
//!
//! Every failure a facade call can report maps onto the `0 | negative`
//! status surface through [`SessionError::code`]. Codes follow the negated
//! POSIX errno convention used by embedded network stacks.

use crate::engine::EngineError;
use crate::identity::IdentityError;
use crate::session::SignalKind;
use std::time::Duration;
use thiserror::Error;

/// Integer status returned across the facade: zero on success, negative on failure
pub type Status = i32;

/// Negated errno values used as status codes
pub mod errno {
    use super::Status;

    pub const OK: Status = 0;
    pub const EIO: Status = -5;
    pub const EAGAIN: Status = -11;
    pub const ENOMEM: Status = -12;
    pub const EACCES: Status = -13;
    pub const EINVAL: Status = -22;
    pub const ECONNRESET: Status = -104;
    pub const EISCONN: Status = -106;
    pub const ENOTCONN: Status = -107;
    pub const ESHUTDOWN: Status = -108;
    pub const ETIMEDOUT: Status = -110;
    pub const ECONNREFUSED: Status = -111;
    pub const EHOSTUNREACH: Status = -113;
}

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid broker host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Failed to resolve broker host '{host}'")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Client identity unavailable: {0}")]
    Identity(#[from] IdentityError),

    #[error("Invalid publish topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Protocol engine initialization failed")]
    Init(#[source] EngineError),

    #[error("Failed to start session runtime")]
    Runtime(#[source] std::io::Error),

    #[error("{operation} request rejected by protocol engine")]
    Request {
        operation: SignalKind,
        #[source]
        source: EngineError,
    },

    #[error("{operation} failed with protocol status {code}")]
    Protocol { operation: SignalKind, code: Status },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: SignalKind,
        timeout: Duration,
    },

    #[error("{operation} aborted: session driver has shut down")]
    Closed { operation: SignalKind },
}

impl SessionError {
    /// Create invalid host error
    pub fn invalid_host<H: Into<String>, R: Into<String>>(host: H, reason: R) -> Self {
        Self::InvalidHost {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create invalid topic error
    pub fn invalid_topic<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Map this error onto the negative status surface
    pub fn code(&self) -> Status {
        match self {
            SessionError::InvalidHost { .. }
            | SessionError::Identity(_)
            | SessionError::InvalidTopic { .. } => errno::EINVAL,
            SessionError::Resolve { .. } => errno::EHOSTUNREACH,
            SessionError::Init(source) => source.code(),
            SessionError::Runtime(_) => errno::EIO,
            SessionError::Request { source, .. } => source.code(),
            SessionError::Protocol { code, .. } => *code,
            SessionError::Timeout { .. } => errno::ETIMEDOUT,
            SessionError::Closed { .. } => errno::ESHUTDOWN,
        }
    }

    /// True when the error happened before any request reached the engine
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidHost { .. }
                | SessionError::Resolve { .. }
                | SessionError::Identity(_)
                | SessionError::InvalidTopic { .. }
                | SessionError::Init(_)
                | SessionError::Runtime(_)
        )
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Flatten a facade result into its integer status
pub fn status(result: &SessionResult<()>) -> Status {
    match result {
        Ok(()) => errno::OK,
        Err(e) => e.code(),
    }
}
