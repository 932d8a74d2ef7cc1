use std::time::Duration;

use shmeta_meta::MetaError;
use shmeta_protocol::ProtocolError;
use shmeta_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The engine was closed or its channel broke earlier.
    #[error("connection is closed")]
    Closed,

    #[error("dangling member reference: {0}")]
    DanglingReference(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("timed out after {waited:?} waiting for {target}")]
    Timeout { target: String, waited: Duration },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::Connection,
            Self::DanglingReference(_) => ErrorKind::DanglingReference,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Protocol(e) => e.kind(),
            Self::Meta(e) => e.kind(),
        }
    }

    /// Human-readable text without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Protocol(ProtocolError::Remote { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
