use shmeta_meta::MetaError;
use shmeta_protocol::ProtocolError;
use shmeta_sync::SyncError;
use shmeta_types::ErrorKind;
use thiserror::Error;

use crate::config::ConfigError;

/// The error every client operation reports: one variant per [`ErrorKind`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("ConnectionError: {0}")]
    Connection(String),

    #[error("NotFoundError: {0}")]
    NotFound(String),

    #[error("TimeoutError: {0}")]
    Timeout(String),

    #[error("DanglingReferenceError: {0}")]
    DanglingReference(String),

    #[error("IllegalStateError: {0}")]
    IllegalState(String),

    #[error("InvalidPatternError: {0}")]
    InvalidPattern(String),

    #[error("AlreadyExistsError: {0}")]
    AlreadyExists(String),
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Connection => Self::Connection(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Timeout => Self::Timeout(message),
            ErrorKind::DanglingReference => Self::DanglingReference(message),
            ErrorKind::IllegalState => Self::IllegalState(message),
            ErrorKind::InvalidPattern => Self::InvalidPattern(message),
            ErrorKind::AlreadyExists => Self::AlreadyExists(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::DanglingReference(_) => ErrorKind::DanglingReference,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::InvalidPattern(_) => ErrorKind::InvalidPattern,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::NotFound(m)
            | Self::Timeout(m)
            | Self::DanglingReference(m)
            | Self::IllegalState(m)
            | Self::InvalidPattern(m)
            | Self::AlreadyExists(m) => m,
        }
    }
}

impl From<SyncError> for ClientError {
    fn from(e: SyncError) -> Self {
        Self::new(e.kind(), e.message())
    }
}

impl From<MetaError> for ClientError {
    fn from(e: MetaError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        SyncError::from(e).into()
    }
}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        Self::Connection(e.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
