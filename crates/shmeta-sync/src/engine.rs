use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use shmeta_meta::{MetaRecord, MetaValue, ObjectMeta, Resolver, TypenamePattern};
use shmeta_protocol::{
    Channel, ClientKind, ClusterMember, InstanceStatus, Interrupt, ProtocolError, Request,
    Response, PROTOCOL_VERSION,
};
use shmeta_types::{ErrorKind, InstanceId, ObjectId};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::liveness::Liveness;
use crate::options::{DeleteOptions, GetOptions, ListOptions};

/// Upper bound on the best-effort `Exit` sent while closing.
const EXIT_TIMEOUT: Duration = Duration::from_millis(500);

/// What the instance told us during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub instance_id: InstanceId,
    pub ipc_socket: String,
    pub rpc_endpoint: String,
    pub server_version: String,
}

/// Synchronization engine over one channel.
///
/// Requests are serialized by a mutex around the channel, so callers on
/// several threads observe them in submission order. The bounded wait loop
/// releases the mutex while it sleeps. Closing does not wait for a call in
/// flight: it breaks the channel through an interrupter held outside the
/// mutex. Once the channel fails or the engine is closed, every call returns
/// a connection error.
pub struct SyncEngine {
    channel: Mutex<Box<dyn Channel>>,
    interrupter: Option<Arc<dyn Interrupt>>,
    liveness: Liveness,
    config: SyncConfig,
    registration: Registration,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("registration", &self.registration)
            .field("open", &self.liveness.is_open())
            .finish()
    }
}

impl SyncEngine {
    /// Register with the instance behind `channel`.
    ///
    /// On failure the channel is closed and no engine exists.
    pub fn handshake(
        mut channel: Box<dyn Channel>,
        kind: ClientKind,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let request = Request::Register {
            kind,
            version: PROTOCOL_VERSION,
        };
        let exchange = channel
            .set_timeout(config.request_timeout())
            .and_then(|()| channel.call(&request))
            .and_then(Response::into_result);
        let response = match exchange {
            Ok(response) => response,
            Err(e) => {
                channel.close();
                warn!(kind = kind.as_str(), error = %e, "handshake failed");
                return Err(match e {
                    ProtocolError::Remote { message, .. } => {
                        SyncError::Protocol(ProtocolError::Remote {
                            kind: ErrorKind::Connection,
                            message,
                        })
                    }
                    other => SyncError::Protocol(other),
                });
            }
        };
        let Response::Registered {
            instance_id,
            ipc_socket,
            rpc_endpoint,
            version,
            server_version,
        } = response
        else {
            channel.close();
            return Err(response.unexpected("Registered").into());
        };
        if version != PROTOCOL_VERSION {
            channel.close();
            return Err(ProtocolError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: version,
            }
            .into());
        }
        info!(instance = %instance_id, kind = kind.as_str(), %server_version, "registered with instance");
        Ok(Self {
            interrupter: channel.interrupter(),
            channel: Mutex::new(channel),
            liveness: Liveness::new(),
            config,
            registration: Registration {
                instance_id,
                ipc_socket,
                rpc_endpoint,
                server_version,
            },
        })
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.liveness.is_open()
    }

    /// Send `Exit` if possible, then close. Wakes any waiting caller and
    /// breaks a call in flight. Idempotent.
    pub fn close(&self) {
        if !self.liveness.close() {
            return;
        }
        let mut channel = match self.channel.try_lock() {
            Ok(channel) => channel,
            Err(TryLockError::WouldBlock) => {
                if let Some(interrupter) = &self.interrupter {
                    interrupter.interrupt();
                }
                self.channel.lock().expect("lock poisoned")
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if channel.is_open() {
            let exit = channel
                .set_timeout(Some(EXIT_TIMEOUT))
                .and_then(|()| channel.call(&Request::Exit));
            if let Err(e) = exit {
                debug!(error = %e, "exit request failed");
            }
        }
        channel.close();
        info!(instance = %self.registration.instance_id, "disconnected");
    }

    fn call(&self, request: &Request) -> SyncResult<Response> {
        self.call_within(request, self.config.request_timeout())
    }

    /// One round-trip that may block on the instance for at most `timeout`.
    /// Transport failures and connection-kind errors from the instance leave
    /// the engine closed.
    fn call_within(&self, request: &Request, timeout: Option<Duration>) -> SyncResult<Response> {
        if !self.liveness.is_open() {
            return Err(SyncError::Closed);
        }
        let mut channel = self.channel.lock().expect("lock poisoned");
        if !self.liveness.is_open() {
            return Err(SyncError::Closed);
        }
        let exchange = channel
            .set_timeout(timeout)
            .and_then(|()| channel.call(request))
            .and_then(Response::into_result);
        match exchange {
            Ok(response) => Ok(response),
            Err(e) if e.kind() == ErrorKind::Connection => {
                warn!(request = request.type_name(), error = %e, "channel failed");
                channel.close();
                drop(channel);
                self.liveness.close();
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll `attempt` until it yields a value or `timeout` elapses.
    ///
    /// `attempt` receives how long its round-trip may block: the remaining
    /// budget plus one retry interval. An instance that stays silent past it
    /// ends the wait with a timeout; the engine is closed then, since the
    /// late reply could no longer be matched to its request. The channel
    /// mutex is free while sleeping; closing the engine ends the sleep early
    /// with a connection error.
    fn retry<T>(
        &self,
        what: &str,
        timeout: Duration,
        mut attempt: impl FnMut(Duration) -> SyncResult<Option<T>>,
    ) -> SyncResult<T> {
        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let budget = timeout.saturating_sub(start.elapsed()) + self.config.retry_interval();
            match attempt(budget) {
                Ok(Some(value)) => {
                    debug!(waiting_for = what, attempts, "wait satisfied");
                    return Ok(value);
                }
                Ok(None) => {}
                Err(SyncError::Protocol(e)) if e.is_timeout() => {
                    let waited = start.elapsed();
                    warn!(waiting_for = what, ?waited, "instance silent past the wait budget");
                    return Err(SyncError::Timeout {
                        target: what.to_string(),
                        waited,
                    });
                }
                Err(e) => return Err(e),
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                debug!(waiting_for = what, attempts, ?elapsed, "wait timed out");
                return Err(SyncError::Timeout {
                    target: what.to_string(),
                    waited: elapsed,
                });
            }
            let pause = self.config.retry_interval().min(timeout - elapsed);
            if !self.liveness.sleep(pause) {
                return Err(SyncError::Closed);
            }
        }
    }

    /// Cap a wait budget by the configured per-request limit.
    fn bounded(&self, budget: Duration) -> Option<Duration> {
        Some(match self.config.request_timeout() {
            Some(limit) => budget.min(limit),
            None => budget,
        })
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Submit an unsealed descriptor; returns the sealed snapshot.
    pub fn create(&self, meta: &ObjectMeta) -> SyncResult<ObjectMeta> {
        if meta.is_sealed() {
            return Err(SyncError::IllegalState(format!(
                "descriptor {} is already sealed",
                meta.id().map(|id| id.to_string()).unwrap_or_default()
            )));
        }
        if meta.typename().is_empty() {
            return Err(SyncError::IllegalState("descriptor has no typename".into()));
        }

        let unresolved = meta.unresolved_members();
        if !unresolved.is_empty() {
            let missing = self.missing(&unresolved)?;
            if !missing.is_empty() {
                let ids: Vec<String> = missing.iter().map(ToString::to_string).collect();
                return Err(SyncError::DanglingReference(ids.join(", ")));
            }
        }

        let response = self.call(&Request::CreateData {
            record: meta.to_record(),
        })?;
        let Response::Created { record } = response else {
            return Err(response.unexpected("Created").into());
        };
        let created = ObjectMeta::from_created(record, meta);
        debug!(id = ?created.id(), typename = created.typename(), "created");
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Get
    // -----------------------------------------------------------------------

    pub fn get(&self, id: ObjectId, options: &GetOptions) -> SyncResult<ObjectMeta> {
        let mut metas = self.get_many(&[id], options)?;
        metas.pop().ok_or_else(|| ProtocolError::Remote {
            kind: ErrorKind::NotFound,
            message: format!("object {id}"),
        }
        .into())
    }

    /// Fetch several descriptors with one round-trip per attempt.
    pub fn get_many(&self, ids: &[ObjectId], options: &GetOptions) -> SyncResult<Vec<ObjectMeta>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if !options.wait {
            return self.fetch(ids, options.sync_remote, self.config.request_timeout());
        }
        let timeout = options.timeout.unwrap_or_else(|| self.config.wait_timeout());
        let target = render_ids(ids);
        debug!(waiting_for = %target, ?timeout, "waiting for objects");
        self.retry(&target, timeout, |budget| {
            match self.fetch(ids, true, self.bounded(budget)) {
                Ok(metas) => Ok(Some(metas)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn fetch(
        &self,
        ids: &[ObjectId],
        sync_remote: bool,
        timeout: Option<Duration>,
    ) -> SyncResult<Vec<ObjectMeta>> {
        let request = Request::GetData {
            ids: ids.to_vec(),
            sync_remote,
        };
        let response = self.call_within(&request, timeout)?;
        let Response::Metas { roots, records } = response else {
            return Err(response.unexpected("Metas").into());
        };
        materialize(roots, records)
    }

    // -----------------------------------------------------------------------
    // List
    // -----------------------------------------------------------------------

    /// Sealed entries of the local namespace whose typename matches.
    pub fn list(&self, options: &ListOptions) -> SyncResult<Vec<ObjectMeta>> {
        TypenamePattern::compile(&options.pattern, options.regex)?;
        let response = self.call(&Request::ListData {
            pattern: options.pattern.clone(),
            regex: options.regex,
            limit: options.limit,
        })?;
        let Response::Metas { roots, records } = response else {
            return Err(response.unexpected("Metas").into());
        };
        debug!(pattern = %options.pattern, found = roots.len(), "listed");
        materialize(roots, records)
    }

    // -----------------------------------------------------------------------
    // Existence, sync, delete
    // -----------------------------------------------------------------------

    /// Ids among `ids` the instance does not know.
    pub fn missing(&self, ids: &[ObjectId]) -> SyncResult<Vec<ObjectId>> {
        let response = self.call(&Request::Exists { ids: ids.to_vec() })?;
        match response {
            Response::Existence { missing } => Ok(missing),
            other => Err(other.unexpected("Existence").into()),
        }
    }

    pub fn exists(&self, id: ObjectId) -> SyncResult<bool> {
        Ok(self.missing(&[id])?.is_empty())
    }

    pub fn sync_meta(&self) -> SyncResult<()> {
        match self.call(&Request::SyncMeta)? {
            Response::Synced => Ok(()),
            other => Err(other.unexpected("Synced").into()),
        }
    }

    pub fn delete(&self, ids: &[ObjectId], options: &DeleteOptions) -> SyncResult<Vec<ObjectId>> {
        let response = self.call(&Request::DeleteData {
            ids: ids.to_vec(),
            force: options.force,
            deep: options.deep,
        })?;
        match response {
            Response::Deleted { ids } => Ok(ids),
            other => Err(other.unexpected("Deleted").into()),
        }
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    pub fn put_name(&self, id: ObjectId, name: &str) -> SyncResult<()> {
        match self.call(&Request::PutName {
            name: name.to_string(),
            id,
        })? {
            Response::NamePut => Ok(()),
            other => Err(other.unexpected("NamePut").into()),
        }
    }

    /// Resolve a name, optionally waiting for it to be bound.
    pub fn get_name(&self, name: &str, wait: bool) -> SyncResult<ObjectId> {
        if !wait {
            return self.lookup_name(name, self.config.request_timeout());
        }
        self.retry(name, self.config.wait_timeout(), |budget| {
            match self.lookup_name(name, self.bounded(budget)) {
                Ok(id) => Ok(Some(id)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn lookup_name(&self, name: &str, timeout: Option<Duration>) -> SyncResult<ObjectId> {
        let request = Request::GetName {
            name: name.to_string(),
        };
        match self.call_within(&request, timeout)? {
            Response::Name { id } => Ok(id),
            other => Err(other.unexpected("Name").into()),
        }
    }

    pub fn drop_name(&self, name: &str) -> SyncResult<()> {
        match self.call(&Request::DropName {
            name: name.to_string(),
        })? {
            Response::NameDropped => Ok(()),
            other => Err(other.unexpected("NameDropped").into()),
        }
    }

    pub fn list_names(&self, options: &ListOptions) -> SyncResult<Vec<(String, ObjectId)>> {
        TypenamePattern::compile(&options.pattern, options.regex)?;
        match self.call(&Request::ListNames {
            pattern: options.pattern.clone(),
            regex: options.regex,
            limit: options.limit,
        })? {
            Response::Names { names } => Ok(names),
            other => Err(other.unexpected("Names").into()),
        }
    }

    pub fn status(&self) -> SyncResult<InstanceStatus> {
        match self.call(&Request::InstanceStatus)? {
            Response::Status { status } => Ok(status),
            other => Err(other.unexpected("Status").into()),
        }
    }

    // -----------------------------------------------------------------------
    // Copies, clearing, cluster view
    // -----------------------------------------------------------------------

    /// Create a new object from `id` with `extra` properties laid over it.
    /// Members are shared with the source, not copied.
    pub fn shallow_copy(
        &self,
        id: ObjectId,
        extra: &BTreeMap<String, MetaValue>,
    ) -> SyncResult<ObjectId> {
        let response = self.call(&Request::ShallowCopy {
            id,
            extra: extra.clone(),
        })?;
        let Response::Created { record } = response else {
            return Err(response.unexpected("Created").into());
        };
        let copy = record
            .id
            .ok_or_else(|| SyncError::IllegalState(format!("copy of {id} came back without id")))?;
        debug!(source = %id, copy = %copy, "shallow copied");
        Ok(copy)
    }

    /// Drop every object visible to the instance. Returns the removed ids.
    pub fn clear(&self) -> SyncResult<Vec<ObjectId>> {
        match self.call(&Request::Clear)? {
            Response::Deleted { ids } => {
                info!(instance = %self.registration.instance_id, count = ids.len(), "cleared");
                Ok(ids)
            }
            other => Err(other.unexpected("Deleted").into()),
        }
    }

    /// The instances of the cluster, keyed by instance id.
    pub fn cluster_info(&self) -> SyncResult<BTreeMap<InstanceId, ClusterMember>> {
        match self.call(&Request::ClusterInfo)? {
            Response::Cluster { members } => Ok(members
                .into_iter()
                .map(|member| (member.instance_id, member))
                .collect()),
            other => Err(other.unexpected("Cluster").into()),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Rebuild each root's tree from the shipped closure. Every record is built
/// once; members and roots referencing it share the snapshot.
fn materialize(roots: Vec<ObjectId>, records: Vec<MetaRecord>) -> SyncResult<Vec<ObjectMeta>> {
    let by_id: BTreeMap<ObjectId, MetaRecord> = records
        .into_iter()
        .filter_map(|record| record.id.map(|id| (id, record)))
        .collect();
    let mut resolver = Resolver::new(&by_id);
    roots
        .into_iter()
        .map(|root| resolver.resolve_owned(root).map_err(SyncError::from))
        .collect()
}

fn render_ids(ids: &[ObjectId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
