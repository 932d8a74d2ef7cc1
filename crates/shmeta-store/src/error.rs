use shmeta_meta::MetaError;
use shmeta_types::{ErrorKind, InstanceId, TypeError};

/// Errors from store instance operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No entry with this id or name is visible to the instance.
    #[error("not found: {0}")]
    NotFound(String),

    /// A member id does not resolve to a sealed entry.
    #[error("dangling member reference: {0}")]
    DanglingReference(String),

    /// The request is not allowed in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The name is bound to another object.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Every instance slot is taken.
    #[error("cluster is full: all {0} instance slots are in use")]
    ClusterFull(u64),

    /// The client speaks another protocol version.
    #[error("protocol version mismatch: instance speaks {local}, client speaks {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    /// The instance has left the cluster.
    #[error("instance {0} has shut down")]
    ShutDown(InstanceId),

    #[error("descriptor error: {0}")]
    Meta(#[from] MetaError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DanglingReference(_) => ErrorKind::DanglingReference,
            Self::IllegalState(_) | Self::Type(_) => ErrorKind::IllegalState,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::ClusterFull(_) | Self::ShutDown(_) | Self::VersionMismatch { .. } => ErrorKind::Connection,
            Self::Meta(e) => e.kind(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(StoreError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            StoreError::DanglingReference("x".into()).kind(),
            ErrorKind::DanglingReference
        );
        assert_eq!(StoreError::AlreadyExists("x".into()).kind(), ErrorKind::AlreadyExists);
        assert_eq!(StoreError::ShutDown(InstanceId::new(1)).kind(), ErrorKind::Connection);
        let pattern = MetaError::InvalidPattern {
            pattern: "(".into(),
            reason: "unclosed group".into(),
        };
        assert_eq!(StoreError::from(pattern).kind(), ErrorKind::InvalidPattern);
    }
}
