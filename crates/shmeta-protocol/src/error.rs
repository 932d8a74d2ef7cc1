use shmeta_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse { expected: &'static str, got: &'static str },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("channel is disconnected")]
    Disconnected,

    /// The store instance answered with an error.
    #[error("{kind}: {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Remote errors keep the kind the instance reported; every other
    /// protocol failure means the channel can no longer be trusted.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote { kind, .. } => *kind,
            _ => ErrorKind::Connection,
        }
    }

    /// Returns `true` if a socket timeout ended the call.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_their_kind() {
        let err = ProtocolError::Remote {
            kind: ErrorKind::NotFound,
            message: "object o0000000000000001 not found".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "NotFoundError: object o0000000000000001 not found"
        );
    }

    #[test]
    fn transport_errors_are_connection_errors() {
        assert_eq!(ProtocolError::Disconnected.kind(), ErrorKind::Connection);
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(ProtocolError::from(io).kind(), ErrorKind::Connection);
    }

    #[test]
    fn socket_timeouts_are_recognized() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::WouldBlock, "timed out");
        assert!(ProtocolError::from(timed_out).is_timeout());
        assert!(!ProtocolError::Disconnected.is_timeout());
    }
}
