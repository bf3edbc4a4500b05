//! Error types for the IPv4LL engine
//!
//! This module defines all error types surfaced by the public API.
//! Protocol outcomes (conflicts, link loss) are not errors: they are
//! delivered as [`crate::Ipv4llEvent`]s.

use crate::traits::AcdError;
use thiserror::Error;

/// Result type alias for IPv4LL operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the IPv4LL engine
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied configuration violates a precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in the wrong lifecycle state
    #[error("Busy: {0}")]
    Busy(String),

    /// Allocation failed while growing engine state
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The ACD backend reported a condition the engine cannot recover from.
    ///
    /// The only sensible response is to drop the context and create a new one.
    #[error("Not recoverable: {0}")]
    NotRecoverable(String),

    /// I/O errors from the ACD backend's descriptor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a busy error
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Create a resource exhaustion error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a non-recoverable error
    pub fn not_recoverable(msg: impl Into<String>) -> Self {
        Self::NotRecoverable(msg.into())
    }

    /// Whether this error means the context must be torn down
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotRecoverable(_) | Self::ResourceExhausted(_) | Self::Io(_)
        )
    }

    /// Map a backend error from an operation where `Busy` is a legitimate answer
    /// (`start`, `announce`).
    pub(crate) fn from_acd_request(err: AcdError) -> Self {
        match err {
            AcdError::Busy => Self::busy("ACD engine is busy"),
            other => Self::from_acd(other),
        }
    }

    /// Map a backend error from an operation where every failure is unexpected.
    pub(crate) fn from_acd(err: AcdError) -> Self {
        match err {
            AcdError::OutOfMemory => Self::resource_exhausted("ACD engine out of memory"),
            AcdError::Io(e) => Self::Io(e),
            AcdError::Busy => Self::not_recoverable("unexpected busy from ACD engine"),
            AcdError::InvalidArgument(msg) => {
                Self::not_recoverable(format!("ACD engine rejected its arguments: {}", msg))
            }
            AcdError::Unexpected(msg) => Self::not_recoverable(msg),
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::ResourceExhausted(err.to_string())
    }
}
