use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use shmeta_meta::{MetaRecord, TypenamePattern};
use shmeta_protocol::ClusterMember;
use shmeta_types::object::MAX_INSTANCE;
use shmeta_types::{InstanceId, ObjectId};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{StoreError, StoreResult};

/// A change published by one instance for the others to pull.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Put(MetaRecord),
    Delete(ObjectId),
}

#[derive(Debug)]
struct LogEntry {
    origin: InstanceId,
    visible_at: Instant,
    change: Change,
}

#[derive(Debug, Default)]
struct Slot {
    active: bool,
    hostname: String,
    /// Next sequence number to hand out in this slot.
    next_sequence: u64,
    /// Log position the slot's instance has pulled up to.
    cursor: usize,
    joined_at_ms: u64,
}

/// Live records folded out of the compacted log prefix, in log order.
#[derive(Debug, Default)]
struct Snapshot {
    entries: BTreeMap<usize, (InstanceId, MetaRecord)>,
    positions: HashMap<ObjectId, usize>,
}

impl Snapshot {
    fn fold(&mut self, position: usize, entry: LogEntry) {
        match entry.change {
            Change::Put(record) => {
                if let Some(id) = record.id {
                    self.positions.insert(id, position);
                    self.entries.insert(position, (entry.origin, record));
                }
            }
            Change::Delete(id) => {
                if let Some(position) = self.positions.remove(&id) {
                    self.entries.remove(&position);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    /// Retained log entries; the first sits at absolute position `base`.
    log: VecDeque<LogEntry>,
    base: usize,
    snapshot: Snapshot,
    slots: BTreeMap<InstanceId, Slot>,
    names: BTreeMap<String, ObjectId>,
}

impl ClusterState {
    fn end(&self) -> usize {
        self.base + self.log.len()
    }

    /// Fold every entry all active instances have pulled past into the
    /// snapshot.
    fn compact(&mut self) {
        let floor = self
            .slots
            .values()
            .filter(|slot| slot.active)
            .map(|slot| slot.cursor)
            .min()
            .unwrap_or(self.base);
        let mut folded = 0;
        while self.base < floor {
            let Some(entry) = self.log.pop_front() else {
                break;
            };
            self.snapshot.fold(self.base, entry);
            self.base += 1;
            folded += 1;
        }
        if folded > 0 {
            debug!(folded, base = self.base, live = self.snapshot.entries.len(), "compacted log");
        }
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Granted instance slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Membership {
    pub instance_id: InstanceId,
    pub next_sequence: u64,
}

/// The cluster backplane.
///
/// Holds the change log, the instance slot table and the cluster-wide name
/// table. Every published change carries the instant it becomes visible to
/// other instances; an instance only sees it when it pulls after that
/// instant. Once every active instance has pulled past a log entry, the
/// entry is folded into a snapshot of live records, which is what a newly
/// joined instance receives in place of the full history.
#[derive(Debug)]
pub struct Cluster {
    config: ClusterConfig,
    state: Mutex<ClusterState>,
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(ClusterState::default()),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Claim the lowest free instance slot.
    pub fn join(&self, hostname: &str) -> StoreResult<Membership> {
        let mut state = self.state.lock().expect("lock poisoned");
        for raw in 0..=MAX_INSTANCE {
            let instance_id = InstanceId::new(raw);
            let slot = state.slots.entry(instance_id).or_insert_with(|| Slot {
                next_sequence: 1,
                ..Slot::default()
            });
            if slot.active {
                continue;
            }
            slot.active = true;
            slot.hostname = hostname.to_string();
            slot.cursor = 0;
            slot.joined_at_ms = wall_clock_ms();
            info!(instance = %instance_id, hostname, "instance joined cluster");
            return Ok(Membership {
                instance_id,
                next_sequence: slot.next_sequence,
            });
        }
        Err(StoreError::ClusterFull(MAX_INSTANCE + 1))
    }

    /// Release a slot. `next_sequence` is kept so a later owner of the same
    /// slot continues after it.
    pub fn leave(&self, instance_id: InstanceId, next_sequence: u64) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(slot) = state.slots.get_mut(&instance_id) {
            slot.active = false;
            slot.next_sequence = slot.next_sequence.max(next_sequence);
            info!(instance = %instance_id, "instance left cluster");
        }
    }

    /// Ids of the instances currently holding a slot.
    pub fn members(&self) -> Vec<InstanceId> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .slots
            .iter()
            .filter(|(_, slot)| slot.active)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Active instances with their host and join time.
    pub fn describe(&self) -> Vec<ClusterMember> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .slots
            .iter()
            .filter(|(_, slot)| slot.active)
            .map(|(id, slot)| ClusterMember {
                instance_id: *id,
                hostname: slot.hostname.clone(),
                joined_at_ms: slot.joined_at_ms,
            })
            .collect()
    }

    pub fn hostname_of(&self, instance_id: InstanceId) -> Option<String> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .slots
            .get(&instance_id)
            .filter(|slot| slot.active)
            .map(|slot| slot.hostname.clone())
    }

    /// Append a change to the log.
    pub fn publish(&self, origin: InstanceId, change: Change) {
        let visible_at = Instant::now() + self.config.propagation_delay();
        let mut state = self.state.lock().expect("lock poisoned");
        state.log.push_back(LogEntry {
            origin,
            visible_at,
            change,
        });
    }

    /// Changes from other instances that became visible since `cursor`.
    ///
    /// Returns the changes and the cursor to pass next time. Entries are
    /// appended in visibility order, so the scan stops at the first entry
    /// that is not visible yet. A cursor behind the compacted prefix first
    /// receives the snapshot of live records.
    pub fn pull(&self, reader: InstanceId, cursor: usize) -> (Vec<Change>, usize) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("lock poisoned");
        let mut changes = Vec::new();
        let mut next = cursor.min(state.end());
        if next < state.base {
            changes.extend(
                state
                    .snapshot
                    .entries
                    .values()
                    .filter(|(origin, _)| *origin != reader)
                    .map(|(_, record)| Change::Put(record.clone())),
            );
            next = state.base;
        }
        for entry in state.log.range(next - state.base..) {
            if entry.visible_at > now {
                break;
            }
            next += 1;
            if entry.origin != reader {
                changes.push(entry.change.clone());
            }
        }
        if let Some(slot) = state.slots.get_mut(&reader) {
            slot.cursor = next;
        }
        state.compact();
        debug!(reader = %reader, pulled = changes.len(), cursor = next, "pulled changes");
        (changes, next)
    }

    /// Number of log entries not yet folded into the snapshot.
    pub fn retained(&self) -> usize {
        self.state.lock().expect("lock poisoned").log.len()
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    /// Bind `name` to `id`. Rebinding to the same id is a no-op.
    pub fn put_name(&self, name: &str, id: ObjectId) -> StoreResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.names.get(name) {
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => Err(StoreError::AlreadyExists(format!(
                "name '{name}' is bound to {existing}"
            ))),
            None => {
                state.names.insert(name.to_string(), id);
                Ok(())
            }
        }
    }

    pub fn get_name(&self, name: &str) -> Option<ObjectId> {
        let state = self.state.lock().expect("lock poisoned");
        state.names.get(name).copied()
    }

    pub fn drop_name(&self, name: &str) -> StoreResult<ObjectId> {
        let mut state = self.state.lock().expect("lock poisoned");
        state
            .names
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(format!("name '{name}'")))
    }

    /// Names matching `pattern` in lexicographic order. `limit == 0` means
    /// unbounded.
    pub fn list_names(&self, pattern: &TypenamePattern, limit: usize) -> Vec<(String, ObjectId)> {
        let state = self.state.lock().expect("lock poisoned");
        let matched = state
            .names
            .iter()
            .filter(|(name, _)| pattern.matches(name))
            .map(|(name, id)| (name.clone(), *id));
        if limit == 0 {
            matched.collect()
        } else {
            matched.take(limit).collect()
        }
    }

    /// Drop every name bound to one of `ids`.
    pub fn unbind(&self, ids: &[ObjectId]) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.names.retain(|_, id| !ids.contains(id));
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            config: ClusterConfig::default(),
            state: Mutex::new(ClusterState::default()),
        }
    }
}
