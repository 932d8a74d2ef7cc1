use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("instance id {0} does not fit in the 10-bit instance field")]
    InstanceOutOfRange(u64),
}

/// Classification of every failure a caller can observe.
///
/// Each crate keeps its own error enum, but all of them map onto one of these
/// kinds so the store can report failures over the wire and the client can
/// rebuild the same error on its side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The channel is unusable; the owning connection is terminal.
    Connection,
    /// No sealed entry matches the id or name at query time.
    NotFound,
    /// A bounded wait elapsed.
    Timeout,
    /// A member reference does not resolve to a sealed descriptor.
    DanglingReference,
    /// Mutation of a sealed descriptor, or an operation not allowed in the
    /// current state.
    IllegalState,
    /// Malformed glob or regular expression.
    InvalidPattern,
    /// A name is already bound to a different object.
    AlreadyExists,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "ConnectionError",
            Self::NotFound => "NotFoundError",
            Self::Timeout => "TimeoutError",
            Self::DanglingReference => "DanglingReferenceError",
            Self::IllegalState => "IllegalStateError",
            Self::InvalidPattern => "InvalidPatternError",
            Self::AlreadyExists => "AlreadyExistsError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
