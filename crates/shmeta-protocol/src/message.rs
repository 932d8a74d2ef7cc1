use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shmeta_meta::{MetaRecord, MetaValue};
use shmeta_types::{ErrorKind, InstanceId, ObjectId};

use crate::error::{ProtocolError, ProtocolResult};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// How a client reaches its instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientKind {
    /// Same-machine client over the local socket.
    Ipc,
    /// Cluster client over the network.
    Rpc,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Rpc => "rpc",
        }
    }
}

/// Snapshot of an instance's identity and load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    /// `"local"` for a single-instance cluster, `"distributed"` otherwise.
    pub deployment: String,
    pub hostname: String,
    pub object_count: u64,
    pub ipc_connections: u64,
    pub rpc_connections: u64,
}

/// One instance of the cluster, as the backplane sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub instance_id: InstanceId,
    pub hostname: String,
    /// Milliseconds since the UNIX epoch at which the instance joined.
    pub joined_at_ms: u64,
}

/// Client-to-instance messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Register { kind: ClientKind, version: u32 },
    Exit,
    CreateData { record: MetaRecord },
    GetData { ids: Vec<ObjectId>, sync_remote: bool },
    ListData { pattern: String, regex: bool, limit: usize },
    Exists { ids: Vec<ObjectId> },
    SyncMeta,
    DeleteData { ids: Vec<ObjectId>, force: bool, deep: bool },
    PutName { name: String, id: ObjectId },
    GetName { name: String },
    DropName { name: String },
    ListNames { pattern: String, regex: bool, limit: usize },
    InstanceStatus,
    ShallowCopy { id: ObjectId, extra: BTreeMap<String, MetaValue> },
    Clear,
    ClusterInfo,
}

/// Instance-to-client messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Registered {
        instance_id: InstanceId,
        ipc_socket: String,
        rpc_endpoint: String,
        version: u32,
        /// Release of the instance software, `MAJOR.MINOR.PATCH`.
        server_version: String,
    },
    Exited,
    Created { record: MetaRecord },
    /// Requested roots plus every record reachable from them.
    Metas { roots: Vec<ObjectId>, records: Vec<MetaRecord> },
    Existence { missing: Vec<ObjectId> },
    Synced,
    Deleted { ids: Vec<ObjectId> },
    NamePut,
    Name { id: ObjectId },
    NameDropped,
    Names { names: Vec<(String, ObjectId)> },
    Status { status: InstanceStatus },
    Cluster { members: Vec<ClusterMember> },
    Error { kind: ErrorKind, message: String },
}

impl Request {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Register { .. } => 1,
            Self::Exit => 2,
            Self::CreateData { .. } => 3,
            Self::GetData { .. } => 4,
            Self::ListData { .. } => 5,
            Self::Exists { .. } => 6,
            Self::SyncMeta => 7,
            Self::DeleteData { .. } => 8,
            Self::PutName { .. } => 9,
            Self::GetName { .. } => 10,
            Self::DropName { .. } => 11,
            Self::ListNames { .. } => 12,
            Self::InstanceStatus => 13,
            Self::ShallowCopy { .. } => 14,
            Self::Clear => 15,
            Self::ClusterInfo => 16,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "Register",
            Self::Exit => "Exit",
            Self::CreateData { .. } => "CreateData",
            Self::GetData { .. } => "GetData",
            Self::ListData { .. } => "ListData",
            Self::Exists { .. } => "Exists",
            Self::SyncMeta => "SyncMeta",
            Self::DeleteData { .. } => "DeleteData",
            Self::PutName { .. } => "PutName",
            Self::GetName { .. } => "GetName",
            Self::DropName { .. } => "DropName",
            Self::ListNames { .. } => "ListNames",
            Self::InstanceStatus => "InstanceStatus",
            Self::ShallowCopy { .. } => "ShallowCopy",
            Self::Clear => "Clear",
            Self::ClusterInfo => "ClusterInfo",
        }
    }
}

impl Response {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Registered { .. } => 129,
            Self::Exited => 130,
            Self::Created { .. } => 131,
            Self::Metas { .. } => 132,
            Self::Existence { .. } => 133,
            Self::Synced => 134,
            Self::Deleted { .. } => 135,
            Self::NamePut => 136,
            Self::Name { .. } => 137,
            Self::NameDropped => 138,
            Self::Names { .. } => 139,
            Self::Status { .. } => 140,
            Self::Cluster { .. } => 141,
            Self::Error { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "Registered",
            Self::Exited => "Exited",
            Self::Created { .. } => "Created",
            Self::Metas { .. } => "Metas",
            Self::Existence { .. } => "Existence",
            Self::Synced => "Synced",
            Self::Deleted { .. } => "Deleted",
            Self::NamePut => "NamePut",
            Self::Name { .. } => "Name",
            Self::NameDropped => "NameDropped",
            Self::Names { .. } => "Names",
            Self::Status { .. } => "Status",
            Self::Cluster { .. } => "Cluster",
            Self::Error { .. } => "Error",
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Turn an `Error` response into a [`ProtocolError::Remote`].
    pub fn into_result(self) -> ProtocolResult<Self> {
        match self {
            Self::Error { kind, message } => Err(ProtocolError::Remote { kind, message }),
            other => Ok(other),
        }
    }

    /// Error for a response of the wrong shape.
    pub fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedResponse {
            expected,
            got: self.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_becomes_remote_error() {
        let err = Response::error(ErrorKind::DanglingReference, "member o01 missing")
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DanglingReference);
    }

    #[test]
    fn non_error_response_passes_through() {
        let resp = Response::Synced.into_result().unwrap();
        assert_eq!(resp, Response::Synced);
    }

    #[test]
    fn unexpected_names_both_sides() {
        let err = Response::Synced.unexpected("Metas");
        assert_eq!(
            err.to_string(),
            "unexpected response: expected Metas, got Synced"
        );
    }

    #[test]
    fn request_and_response_tags_do_not_collide() {
        let requests = [
            Request::Register { kind: ClientKind::Ipc, version: 1 },
            Request::Exit,
            Request::SyncMeta,
            Request::InstanceStatus,
            Request::GetName { name: "n".into() },
            Request::ShallowCopy { id: ObjectId::from_raw(1), extra: BTreeMap::new() },
            Request::Clear,
            Request::ClusterInfo,
        ];
        let responses = [
            Response::Exited,
            Response::Synced,
            Response::NamePut,
            Response::Cluster { members: Vec::new() },
            Response::error(ErrorKind::Timeout, ""),
        ];
        for r in &requests {
            assert!(r.type_tag() < 128, "{}", r.type_name());
        }
        for r in &responses {
            assert!(r.type_tag() > 128, "{}", r.type_name());
        }
    }

    #[test]
    fn client_kind_names() {
        assert_eq!(ClientKind::Ipc.as_str(), "ipc");
        assert_eq!(ClientKind::Rpc.as_str(), "rpc");
    }
}
