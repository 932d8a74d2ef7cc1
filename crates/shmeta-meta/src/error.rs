use shmeta_types::{ErrorKind, ObjectId};

/// Errors from building or decoding descriptors.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Mutation attempted on a sealed descriptor.
    #[error("descriptor {0} is sealed")]
    Sealed(String),

    /// A member snapshot was attached before it was sealed.
    #[error("member {0:?} refers to an unsealed descriptor")]
    UnsealedMember(String),

    /// The key is already used by a property or a member.
    #[error("key {0:?} is already in use")]
    KeyConflict(String),

    /// The typename is empty.
    #[error("descriptor has no typename")]
    MissingTypename,

    /// Malformed glob or regular expression.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A record needed to rebuild a descriptor tree is absent.
    #[error("no record for object {0}")]
    MissingRecord(ObjectId),
}

impl MetaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sealed(_)
            | Self::UnsealedMember(_)
            | Self::KeyConflict(_)
            | Self::MissingTypename => ErrorKind::IllegalState,
            Self::InvalidPattern { .. } => ErrorKind::InvalidPattern,
            Self::MissingRecord(_) => ErrorKind::NotFound,
        }
    }
}

/// Result alias for descriptor operations.
pub type MetaResult<T> = Result<T, MetaError>;
