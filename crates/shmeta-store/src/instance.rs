use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use shmeta_meta::{MetaRecord, MetaValue, TypenamePattern};
use shmeta_protocol::{
    ClientKind, ClusterMember, InstanceStatus, Request, Response, PROTOCOL_VERSION,
};
use shmeta_types::{InstanceId, ObjectId};
use tracing::{debug, info, warn};

use crate::cluster::{Change, Cluster};
use crate::config::{ClusterConfig, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::namespace::Namespace;

/// Release reported to clients during the handshake.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default)]
struct InstanceState {
    namespace: Namespace,
    /// Position in the cluster log up to which changes have been applied.
    cursor: usize,
}

/// One store instance.
///
/// Owns the namespace its clients see, hands out ids from its slot, and
/// exchanges changes with the rest of the cluster through the backplane.
/// Mutations happen under the namespace write lock and are published while
/// it is held, so other instances observe them in the same order.
#[derive(Debug)]
pub struct StoreInstance {
    id: InstanceId,
    config: StoreConfig,
    cluster: Arc<Cluster>,
    next_sequence: AtomicU64,
    state: RwLock<InstanceState>,
    ipc_connections: AtomicU64,
    rpc_connections: AtomicU64,
    running: AtomicBool,
}

impl StoreInstance {
    /// Join `cluster` with a fresh instance slot.
    pub fn join(cluster: &Arc<Cluster>, config: StoreConfig) -> StoreResult<Arc<Self>> {
        let membership = cluster.join(&config.hostname)?;
        Ok(Arc::new(Self {
            id: membership.instance_id,
            config,
            cluster: Arc::clone(cluster),
            next_sequence: AtomicU64::new(membership.next_sequence),
            state: RwLock::new(InstanceState::default()),
            ipc_connections: AtomicU64::new(0),
            rpc_connections: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }))
    }

    /// A single instance in a cluster of its own.
    pub fn standalone(config: StoreConfig) -> StoreResult<Arc<Self>> {
        let cluster = Cluster::new(ClusterConfig::default());
        Self::join(&cluster, config)
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Leave the cluster. Further requests fail with a connection error.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.cluster
                .leave(self.id, self.next_sequence.load(Ordering::Acquire));
            info!(instance = %self.id, "instance shut down");
        }
    }

    /// Number of entries in the namespace, blobs included.
    pub fn object_count(&self) -> usize {
        self.state.read().expect("lock poisoned").namespace.len()
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    pub fn attach(&self, kind: ClientKind) {
        self.counter(kind).fetch_add(1, Ordering::AcqRel);
        debug!(instance = %self.id, kind = kind.as_str(), "client attached");
    }

    pub fn detach(&self, kind: ClientKind) {
        let counter = self.counter(kind);
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug!(instance = %self.id, kind = kind.as_str(), "client detached");
    }

    fn counter(&self, kind: ClientKind) -> &AtomicU64 {
        match kind {
            ClientKind::Ipc => &self.ipc_connections,
            ClientKind::Rpc => &self.rpc_connections,
        }
    }

    // -----------------------------------------------------------------------
    // Request dispatch
    // -----------------------------------------------------------------------

    /// Answer one request. Failures come back as [`Response::Error`].
    pub fn handle(&self, request: &Request) -> Response {
        let result = if self.is_running() {
            self.dispatch(request)
        } else {
            Err(StoreError::ShutDown(self.id))
        };
        result.unwrap_or_else(|e| {
            debug!(instance = %self.id, request = request.type_name(), error = %e, "request failed");
            Response::error(e.kind(), e.to_string())
        })
    }

    fn dispatch(&self, request: &Request) -> StoreResult<Response> {
        match request {
            Request::Register { version, .. } => self.register(*version),
            Request::Exit => Ok(Response::Exited),
            Request::CreateData { record } => {
                let record = self.create(record.clone())?;
                Ok(Response::Created { record })
            }
            Request::GetData { ids, sync_remote } => {
                let records = self.get(ids, *sync_remote)?;
                Ok(Response::Metas {
                    roots: ids.clone(),
                    records,
                })
            }
            Request::ListData {
                pattern,
                regex,
                limit,
            } => {
                let (roots, records) = self.list(pattern, *regex, *limit)?;
                Ok(Response::Metas { roots, records })
            }
            Request::Exists { ids } => Ok(Response::Existence {
                missing: self.missing(ids),
            }),
            Request::SyncMeta => {
                self.sync();
                Ok(Response::Synced)
            }
            Request::DeleteData { ids, force, deep } => {
                let ids = self.delete(ids, *force, *deep)?;
                Ok(Response::Deleted { ids })
            }
            Request::PutName { name, id } => {
                self.put_name(name, *id)?;
                Ok(Response::NamePut)
            }
            Request::GetName { name } => Ok(Response::Name {
                id: self.get_name(name)?,
            }),
            Request::DropName { name } => {
                self.cluster.drop_name(name)?;
                Ok(Response::NameDropped)
            }
            Request::ListNames {
                pattern,
                regex,
                limit,
            } => {
                let pattern = TypenamePattern::compile(pattern, *regex)?;
                Ok(Response::Names {
                    names: self.cluster.list_names(&pattern, *limit),
                })
            }
            Request::InstanceStatus => Ok(Response::Status {
                status: self.status(),
            }),
            Request::ShallowCopy { id, extra } => {
                let record = self.shallow_copy(*id, extra)?;
                Ok(Response::Created { record })
            }
            Request::Clear => Ok(Response::Deleted { ids: self.clear() }),
            Request::ClusterInfo => Ok(Response::Cluster {
                members: self.cluster_info(),
            }),
        }
    }

    fn register(&self, version: u32) -> StoreResult<Response> {
        if version != PROTOCOL_VERSION {
            warn!(instance = %self.id, version, "rejecting client with mismatched protocol version");
            return Err(StoreError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: version,
            });
        }
        Ok(Response::Registered {
            instance_id: self.id,
            ipc_socket: self.config.ipc_socket.clone(),
            rpc_endpoint: self.config.rpc_endpoint.clone(),
            version: PROTOCOL_VERSION,
            server_version: SERVER_VERSION.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Metadata operations
    // -----------------------------------------------------------------------

    fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::AcqRel)
    }

    /// Record a payload region handed out by the allocator.
    pub fn register_blob(&self, nbytes: u64) -> StoreResult<ObjectId> {
        let mut state = self.state.write().expect("lock poisoned");
        let id = ObjectId::compose_blob(self.id, self.next_sequence())?;
        let record = MetaRecord::blob(id, self.id, nbytes);
        state.namespace.insert(record.clone());
        self.cluster.publish(self.id, Change::Put(record));
        debug!(instance = %self.id, id = %id, nbytes, "registered blob");
        Ok(id)
    }

    /// Seal `record` under a fresh id and make it visible.
    ///
    /// Member references are checked under the same lock that inserts the
    /// record, so either every member resolves and the record is stored, or
    /// nothing changes.
    pub fn create(&self, mut record: MetaRecord) -> StoreResult<MetaRecord> {
        if record.sealed || record.id.is_some() {
            return Err(StoreError::IllegalState(
                "descriptor is already sealed".into(),
            ));
        }
        if record.typename.is_empty() {
            return Err(StoreError::IllegalState(
                "descriptor has no typename".into(),
            ));
        }

        let mut state = self.state.write().expect("lock poisoned");
        let members: Vec<ObjectId> = record.member_ids().collect();
        let missing = state.namespace.missing(&members);
        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(StoreError::DanglingReference(ids.join(", ")));
        }

        let id = ObjectId::compose(self.id, self.next_sequence())?;
        record.id = Some(id);
        record.instance_id = self.id;
        record.sealed = true;
        state.namespace.insert(record.clone());
        self.cluster.publish(self.id, Change::Put(record.clone()));
        debug!(instance = %self.id, id = %id, typename = %record.typename, "created");
        Ok(record)
    }

    /// Create a new object with the typename, properties and members of `id`,
    /// with `extra` properties laid over it.
    ///
    /// The copy references the same members; nothing below the top level is
    /// duplicated.
    pub fn shallow_copy(
        &self,
        id: ObjectId,
        extra: &BTreeMap<String, MetaValue>,
    ) -> StoreResult<MetaRecord> {
        if id.is_blob() {
            return Err(StoreError::IllegalState(format!("blob {id} cannot be copied")));
        }
        let mut draft = self
            .state
            .read()
            .expect("lock poisoned")
            .namespace
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("object {id}")))?;
        for (key, value) in extra {
            if draft.members.contains_key(key) {
                return Err(StoreError::IllegalState(format!(
                    "'{key}' names a member of {id}"
                )));
            }
            draft.properties.insert(key.clone(), value.clone());
        }
        draft.id = None;
        draft.instance_id = InstanceId::UNSPECIFIED;
        draft.sealed = false;
        let copy = self.create(draft)?;
        debug!(instance = %self.id, source = %id, copy = ?copy.id, "shallow copied");
        Ok(copy)
    }

    /// Records for `ids` plus everything reachable from them.
    pub fn get(&self, ids: &[ObjectId], sync_remote: bool) -> StoreResult<Vec<MetaRecord>> {
        if sync_remote {
            self.sync();
        }
        let state = self.state.read().expect("lock poisoned");
        if let Some(missing) = state.namespace.missing(ids).first() {
            return Err(StoreError::NotFound(format!("object {missing}")));
        }
        Ok(state.namespace.closure(ids))
    }

    /// Non-blob entries whose typename matches, in insertion order, with the
    /// records of their members.
    pub fn list(
        &self,
        pattern: &str,
        regex: bool,
        limit: usize,
    ) -> StoreResult<(Vec<ObjectId>, Vec<MetaRecord>)> {
        let pattern = TypenamePattern::compile(pattern, regex)?;
        let state = self.state.read().expect("lock poisoned");
        let matched = state
            .namespace
            .iter()
            .filter_map(|record| record.id.filter(|id| !id.is_blob()).map(|id| (id, record)))
            .filter(|(_, record)| pattern.matches(&record.typename))
            .map(|(id, _)| id);
        let roots: Vec<ObjectId> = if limit == 0 {
            matched.collect()
        } else {
            matched.take(limit).collect()
        };
        let records = state.namespace.closure(&roots);
        Ok((roots, records))
    }

    pub fn missing(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        self.state.read().expect("lock poisoned").namespace.missing(ids)
    }

    /// Apply every change other instances published that is visible by now.
    pub fn sync(&self) -> usize {
        let mut state = self.state.write().expect("lock poisoned");
        let (changes, cursor) = self.cluster.pull(self.id, state.cursor);
        state.cursor = cursor;
        let applied = changes.len();
        for change in changes {
            match change {
                Change::Put(record) => {
                    state.namespace.insert(record);
                }
                Change::Delete(id) => {
                    state.namespace.remove(&id);
                }
            }
        }
        if applied > 0 {
            debug!(instance = %self.id, applied, "synchronized with cluster");
        }
        applied
    }

    /// Remove `ids` and, with `deep`, members nobody else references.
    ///
    /// Without `force`, an object referenced by a live object outside the
    /// deletion set is refused. Returns every removed id in order.
    pub fn delete(&self, ids: &[ObjectId], force: bool, deep: bool) -> StoreResult<Vec<ObjectId>> {
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(missing) = state.namespace.missing(ids).first() {
            return Err(StoreError::NotFound(format!("object {missing}")));
        }

        let mut doomed: BTreeSet<ObjectId> = ids.iter().copied().collect();
        if deep {
            let mut frontier: Vec<ObjectId> = ids.to_vec();
            while let Some(id) = frontier.pop() {
                let members: Vec<ObjectId> = state
                    .namespace
                    .get(&id)
                    .map(|record| record.member_ids().collect())
                    .unwrap_or_default();
                for member in members {
                    if doomed.contains(&member) || !state.namespace.contains(&member) {
                        continue;
                    }
                    let shared = state
                        .namespace
                        .referrers(member)
                        .iter()
                        .any(|r| !doomed.contains(r));
                    if force || !shared {
                        doomed.insert(member);
                        frontier.push(member);
                    }
                }
            }
        }

        if !force {
            for id in ids {
                if let Some(holder) = state
                    .namespace
                    .referrers(*id)
                    .into_iter()
                    .find(|r| !doomed.contains(r))
                {
                    return Err(StoreError::IllegalState(format!(
                        "object {id} is still referenced by {holder}"
                    )));
                }
            }
        }

        let removed: Vec<ObjectId> = doomed.into_iter().collect();
        for id in &removed {
            state.namespace.remove(id);
            self.cluster.publish(self.id, Change::Delete(*id));
        }
        self.cluster.unbind(&removed);
        info!(instance = %self.id, count = removed.len(), force, deep, "deleted");
        Ok(removed)
    }

    /// Remove every entry visible to this instance, blobs included, and
    /// publish the deletions. Returns the removed ids in insertion order.
    pub fn clear(&self) -> Vec<ObjectId> {
        let mut state = self.state.write().expect("lock poisoned");
        let removed: Vec<ObjectId> = state.namespace.iter().filter_map(|record| record.id).collect();
        for id in &removed {
            state.namespace.remove(id);
            self.cluster.publish(self.id, Change::Delete(*id));
        }
        self.cluster.unbind(&removed);
        info!(instance = %self.id, count = removed.len(), "cleared namespace");
        removed
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    pub fn put_name(&self, name: &str, id: ObjectId) -> StoreResult<()> {
        if !self.state.read().expect("lock poisoned").namespace.contains(&id) {
            return Err(StoreError::NotFound(format!("object {id}")));
        }
        self.cluster.put_name(name, id)
    }

    pub fn get_name(&self, name: &str) -> StoreResult<ObjectId> {
        self.cluster
            .get_name(name)
            .ok_or_else(|| StoreError::NotFound(format!("name '{name}'")))
    }

    pub fn cluster_info(&self) -> Vec<ClusterMember> {
        self.cluster.describe()
    }

    pub fn status(&self) -> InstanceStatus {
        let deployment = if self.cluster.members().len() > 1 {
            "distributed"
        } else {
            "local"
        };
        InstanceStatus {
            instance_id: self.id,
            deployment: deployment.to_string(),
            hostname: self.config.hostname.clone(),
            object_count: self.object_count() as u64,
            ipc_connections: self.ipc_connections.load(Ordering::Acquire),
            rpc_connections: self.rpc_connections.load(Ordering::Acquire),
        }
    }
}

impl Drop for StoreInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::thread;
    use std::time::Duration;

    use shmeta_meta::MetaValue;
    use shmeta_types::ErrorKind;

    use super::*;

    fn draft(typename: &str, members: &[(&str, ObjectId)]) -> MetaRecord {
        MetaRecord {
            id: None,
            instance_id: InstanceId::UNSPECIFIED,
            typename: typename.into(),
            properties: BTreeMap::new(),
            members: members.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            sealed: false,
        }
    }

    fn instance() -> Arc<StoreInstance> {
        StoreInstance::standalone(StoreConfig::default()).unwrap()
    }

    fn pair_of_instances(delay_ms: u64) -> (Arc<StoreInstance>, Arc<StoreInstance>) {
        let cluster = Cluster::new(ClusterConfig {
            propagation_delay_ms: delay_ms,
        });
        let a = StoreInstance::join(&cluster, StoreConfig::default()).unwrap();
        let b = StoreInstance::join(&cluster, StoreConfig::default()).unwrap();
        (a, b)
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    #[test]
    fn create_seals_and_assigns_ids() {
        let inst = instance();
        let mut rec = draft("int32", &[]);
        rec.properties.insert("value".into(), MetaValue::Int(42));
        let a = inst.create(rec.clone()).unwrap();
        let b = inst.create(rec).unwrap();
        assert!(a.sealed);
        assert_eq!(a.instance_id, inst.instance_id());
        assert_ne!(a.id, b.id);
        let id = a.id.unwrap();
        assert_eq!(id.instance(), inst.instance_id());
        assert!(!id.is_blob());
        assert_eq!(inst.object_count(), 2);
    }

    #[test]
    fn create_rejects_sealed_and_untyped() {
        let inst = instance();
        let mut sealed = draft("t", &[]);
        sealed.sealed = true;
        assert_eq!(inst.create(sealed).unwrap_err().kind(), ErrorKind::IllegalState);
        assert_eq!(inst.create(draft("", &[])).unwrap_err().kind(), ErrorKind::IllegalState);
        assert_eq!(inst.object_count(), 0);
    }

    #[test]
    fn dangling_member_creates_nothing() {
        let inst = instance();
        let ghost = ObjectId::compose(inst.instance_id(), 999).unwrap();
        let err = inst.create(draft("pair", &[("first", ghost)])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DanglingReference);
        assert!(err.to_string().contains(&ghost.to_string()));
        assert_eq!(inst.object_count(), 0);
    }

    #[test]
    fn blob_members_resolve() {
        let inst = instance();
        let blob = inst.register_blob(64).unwrap();
        assert!(blob.is_blob());
        let rec = inst.create(draft("tensor", &[("buffer", blob)])).unwrap();
        let records = inst.get(&[rec.id.unwrap()], false).unwrap();
        assert_eq!(records.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Get / list
    // -----------------------------------------------------------------------

    #[test]
    fn get_returns_closure_and_not_found() {
        let inst = instance();
        let a = inst.create(draft("int32", &[])).unwrap().id.unwrap();
        let b = inst
            .create(draft("pair", &[("first", a), ("second", a)]))
            .unwrap()
            .id
            .unwrap();
        let records = inst.get(&[b], false).unwrap();
        assert_eq!(records.len(), 2);

        let ghost = ObjectId::compose(inst.instance_id(), 777).unwrap();
        assert_eq!(inst.get(&[ghost], false).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn list_matches_in_insertion_order_and_skips_blobs() {
        let inst = instance();
        inst.register_blob(8).unwrap();
        let first = inst.create(draft("foo1", &[])).unwrap().id.unwrap();
        inst.create(draft("bar", &[])).unwrap();
        let second = inst.create(draft("foo2", &[])).unwrap().id.unwrap();

        let (roots, _) = inst.list("foo*", false, 0).unwrap();
        assert_eq!(roots, vec![first, second]);
        let (roots, _) = inst.list("*", false, 0).unwrap();
        assert_eq!(roots.len(), 3);
        let (roots, _) = inst.list("*", false, 2).unwrap();
        assert_eq!(roots.len(), 2);
        let (roots, _) = inst.list("^foo[0-9]+$", true, 0).unwrap();
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn list_rejects_invalid_regex() {
        let inst = instance();
        let err = inst.list("foo([", true, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPattern);
    }

    // -----------------------------------------------------------------------
    // Cluster visibility
    // -----------------------------------------------------------------------

    #[test]
    fn remote_entries_need_sync() {
        let (a, b) = pair_of_instances(0);
        let id = a.create(draft("int32", &[])).unwrap().id.unwrap();
        assert_eq!(b.get(&[id], false).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(b.get(&[id], true).unwrap().len(), 1);
        assert_eq!(b.get(&[id], false).unwrap().len(), 1);
    }

    #[test]
    fn propagation_delay_hides_remote_entries() {
        let (a, b) = pair_of_instances(100);
        let id = a.create(draft("int32", &[])).unwrap().id.unwrap();
        assert!(b.get(&[id], true).is_err());
        thread::sleep(Duration::from_millis(150));
        assert!(b.get(&[id], true).is_ok());
    }

    #[test]
    fn deletions_propagate() {
        let (a, b) = pair_of_instances(0);
        let id = a.create(draft("int32", &[])).unwrap().id.unwrap();
        b.sync();
        a.delete(&[id], false, false).unwrap();
        assert!(b.get(&[id], false).is_ok());
        assert_eq!(b.get(&[id], true).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn ids_are_not_reused_after_slot_recycling() {
        let cluster = Cluster::new(ClusterConfig::default());
        let first = StoreInstance::join(&cluster, StoreConfig::default()).unwrap();
        let old = first.create(draft("t", &[])).unwrap().id.unwrap();
        let slot = first.instance_id();
        drop(first);

        let second = StoreInstance::join(&cluster, StoreConfig::default()).unwrap();
        assert_eq!(second.instance_id(), slot);
        let new = second.create(draft("t", &[])).unwrap().id.unwrap();
        assert!(new > old);
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    #[test]
    fn referenced_object_needs_force() {
        let inst = instance();
        let a = inst.create(draft("int32", &[])).unwrap().id.unwrap();
        let b = inst.create(draft("pair", &[("first", a)])).unwrap().id.unwrap();

        let err = inst.delete(&[a], false, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(inst.delete(&[a], true, false).unwrap(), vec![a]);
        assert!(inst.get(&[b], false).is_ok());
    }

    #[test]
    fn deep_delete_keeps_shared_members() {
        let inst = instance();
        let shared = inst.create(draft("int32", &[])).unwrap().id.unwrap();
        let own = inst.create(draft("int32", &[])).unwrap().id.unwrap();
        let x = inst
            .create(draft("pair", &[("first", shared), ("second", own)]))
            .unwrap()
            .id
            .unwrap();
        let y = inst.create(draft("box", &[("inner", shared)])).unwrap().id.unwrap();

        let removed = inst.delete(&[x], false, true).unwrap();
        assert_eq!(removed, vec![own, x]);
        assert!(inst.get(&[shared, y], false).is_ok());

        let removed = inst.delete(&[y], false, true).unwrap();
        assert_eq!(removed, vec![shared, y]);
        assert_eq!(inst.object_count(), 0);
    }

    #[test]
    fn deleted_ids_stay_reserved() {
        let inst = instance();
        let a = inst.create(draft("t", &[])).unwrap().id.unwrap();
        inst.delete(&[a], false, false).unwrap();
        assert_eq!(inst.get(&[a], false).unwrap_err().kind(), ErrorKind::NotFound);
        let b = inst.create(draft("t", &[])).unwrap().id.unwrap();
        assert_ne!(a, b);
        assert_eq!(inst.delete(&[a], false, false).unwrap_err().kind(), ErrorKind::NotFound);
    }

    // -----------------------------------------------------------------------
    // Shallow copy / clear
    // -----------------------------------------------------------------------

    #[test]
    fn shallow_copy_shares_members_and_adds_properties() {
        let inst = instance();
        let a = inst.create(draft("int32", &[])).unwrap().id.unwrap();
        let mut source = draft("pair", &[("first", a), ("second", a)]);
        source.properties.insert("label".into(), MetaValue::from("p"));
        let source = inst.create(source).unwrap().id.unwrap();

        let extra: BTreeMap<String, MetaValue> =
            [("label".to_string(), MetaValue::from("q")), ("rank".to_string(), MetaValue::Int(2))]
                .into_iter()
                .collect();
        let copy = inst.shallow_copy(source, &extra).unwrap();
        assert!(copy.sealed);
        assert_ne!(copy.id, Some(source));
        assert_eq!(copy.typename, "pair");
        assert_eq!(copy.members.get("first"), Some(&a));
        assert_eq!(copy.properties.get("label"), Some(&MetaValue::from("q")));
        assert_eq!(copy.properties.get("rank"), Some(&MetaValue::Int(2)));
        assert_eq!(inst.object_count(), 3);

        let original = inst.get(&[source], false).unwrap();
        let original = original.iter().find(|r| r.id == Some(source)).unwrap();
        assert_eq!(original.properties.get("label"), Some(&MetaValue::from("p")));
    }

    #[test]
    fn shallow_copy_rejects_unknown_and_member_keys() {
        let inst = instance();
        let ghost = ObjectId::compose(inst.instance_id(), 999).unwrap();
        let none = BTreeMap::new();
        assert_eq!(inst.shallow_copy(ghost, &none).unwrap_err().kind(), ErrorKind::NotFound);

        let a = inst.create(draft("int32", &[])).unwrap().id.unwrap();
        let b = inst.create(draft("box", &[("inner", a)])).unwrap().id.unwrap();
        let clash: BTreeMap<String, MetaValue> =
            [("inner".to_string(), MetaValue::Int(1))].into_iter().collect();
        assert_eq!(inst.shallow_copy(b, &clash).unwrap_err().kind(), ErrorKind::IllegalState);

        let blob = inst.register_blob(8).unwrap();
        assert_eq!(inst.shallow_copy(blob, &none).unwrap_err().kind(), ErrorKind::IllegalState);
        assert_eq!(inst.object_count(), 3);
    }

    #[test]
    fn clear_empties_namespace_everywhere() {
        let (a, b) = pair_of_instances(0);
        let x = a.create(draft("int32", &[])).unwrap().id.unwrap();
        let y = a.create(draft("box", &[("inner", x)])).unwrap().id.unwrap();
        a.register_blob(16).unwrap();
        a.put_name("y", y).unwrap();
        b.sync();
        assert_eq!(b.object_count(), 3);

        let removed = a.clear();
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[..2], [x, y]);
        assert_eq!(a.object_count(), 0);
        assert_eq!(a.get_name("y").unwrap_err().kind(), ErrorKind::NotFound);

        b.sync();
        assert_eq!(b.object_count(), 0);
        assert!(a.clear().is_empty());
    }

    #[test]
    fn cluster_info_lists_active_instances() {
        let (a, b) = pair_of_instances(0);
        let members = a.cluster_info();
        let ids: Vec<InstanceId> = members.iter().map(|m| m.instance_id).collect();
        assert_eq!(ids, vec![a.instance_id(), b.instance_id()]);
        assert!(members.iter().all(|m| m.hostname == "localhost" && m.joined_at_ms > 0));

        b.shutdown();
        assert_eq!(a.cluster_info().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    #[test]
    fn names_are_cluster_wide() {
        let (a, b) = pair_of_instances(1_000);
        let id = a.create(draft("t", &[])).unwrap().id.unwrap();
        a.put_name("latest", id).unwrap();
        assert_eq!(b.get_name("latest").unwrap(), id);
        // b cannot see the object yet, so it cannot bind it
        assert_eq!(b.put_name("other", id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn deleting_an_object_drops_its_names() {
        let inst = instance();
        let id = inst.create(draft("t", &[])).unwrap().id.unwrap();
        inst.put_name("x", id).unwrap();
        inst.delete(&[id], false, false).unwrap();
        assert_eq!(inst.get_name("x").unwrap_err().kind(), ErrorKind::NotFound);
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[test]
    fn handle_maps_errors_to_responses() {
        let inst = instance();
        let resp = inst.handle(&Request::GetData {
            ids: vec![ObjectId::from_raw(5)],
            sync_remote: false,
        });
        match resp {
            Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotFound),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn handshake_checks_version() {
        let inst = instance();
        let ok = inst.handle(&Request::Register {
            kind: ClientKind::Ipc,
            version: PROTOCOL_VERSION,
        });
        match ok {
            Response::Registered {
                instance_id,
                server_version,
                ..
            } => {
                assert_eq!(instance_id, inst.instance_id());
                assert_eq!(server_version, SERVER_VERSION);
                assert_eq!(server_version.split('.').count(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        let bad = inst.handle(&Request::Register {
            kind: ClientKind::Ipc,
            version: PROTOCOL_VERSION + 1,
        });
        assert!(matches!(bad, Response::Error { kind: ErrorKind::Connection, .. }));
    }

    #[test]
    fn shut_down_instance_refuses_requests() {
        let inst = instance();
        inst.shutdown();
        inst.shutdown();
        assert!(!inst.is_running());
        let resp = inst.handle(&Request::SyncMeta);
        assert!(matches!(resp, Response::Error { kind: ErrorKind::Connection, .. }));
    }

    #[test]
    fn status_reports_deployment_and_connections() {
        let (a, _b) = pair_of_instances(0);
        a.attach(ClientKind::Ipc);
        a.attach(ClientKind::Rpc);
        a.detach(ClientKind::Rpc);
        a.detach(ClientKind::Rpc);
        let status = a.status();
        assert_eq!(status.deployment, "distributed");
        assert_eq!(status.ipc_connections, 1);
        assert_eq!(status.rpc_connections, 0);
        assert_eq!(instance().status().deployment, "local");
    }
}
