use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use shmeta_types::{InstanceId, ObjectId};

use crate::error::{MetaError, MetaResult};
use crate::record::MetaRecord;
use crate::value::MetaValue;

/// Members nested deeper than this are rendered by id only in
/// [`ObjectMeta::to_json`].
pub const JSON_DEPTH: usize = 32;

/// A named edge from a descriptor to another object.
///
/// The target id is always known. The target descriptor is present when the
/// edge was built from a sealed snapshot or when the store resolved it.
/// Snapshots are shared: members referencing the same object within one
/// fetched tree point at one `Arc`.
#[derive(Clone)]
pub struct Member {
    id: ObjectId,
    meta: Option<Arc<ObjectMeta>>,
}

impl Member {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The resolved member descriptor, if available.
    pub fn meta(&self) -> Option<&ObjectMeta> {
        self.meta.as_deref()
    }

    /// The shared snapshot handle, if resolved.
    pub fn snapshot(&self) -> Option<&Arc<ObjectMeta>> {
        self.meta.as_ref()
    }

    /// Returns `true` if a sealed snapshot of the target is attached.
    pub fn is_resolved(&self) -> bool {
        self.meta.as_ref().is_some_and(|m| m.sealed)
    }
}

/// Members compare by target id and resolution state. A sealed snapshot never
/// changes and its id is never reused, so the id stands for the snapshot.
impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.meta.is_some() == other.meta.is_some()
    }
}

impl Eq for Member {}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("resolved", &self.meta.is_some())
            .finish()
    }
}

/// Metadata descriptor of one object.
///
/// A mutable builder until the store seals it, an immutable snapshot after.
/// Every mutator fails with [`MetaError::Sealed`] on a sealed descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    id: Option<ObjectId>,
    instance_id: InstanceId,
    typename: String,
    properties: BTreeMap<String, MetaValue>,
    members: BTreeMap<String, Member>,
    sealed: bool,
}

impl ObjectMeta {
    /// Start building a descriptor of the given type.
    pub fn new(typename: impl Into<String>) -> Self {
        Self {
            id: None,
            instance_id: InstanceId::UNSPECIFIED,
            typename: typename.into(),
            properties: BTreeMap::new(),
            members: BTreeMap::new(),
            sealed: false,
        }
    }

    // -----------------------------------------------------------------------
    // Building
    // -----------------------------------------------------------------------

    /// Set a scalar property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> MetaResult<()> {
        self.ensure_unsealed()?;
        let key = key.into();
        if self.members.contains_key(&key) {
            return Err(MetaError::KeyConflict(key));
        }
        self.properties.insert(key, value.into());
        Ok(())
    }

    /// Record an edge to the object `id`.
    ///
    /// The target is not checked here: a dangling id is reported when the
    /// descriptor is submitted.
    pub fn add_member(&mut self, key: impl Into<String>, id: ObjectId) -> MetaResult<()> {
        let key = key.into();
        self.insert_member(key, Member { id, meta: None })
    }

    /// Record an edge to a sealed descriptor, keeping its snapshot.
    pub fn add_member_meta(&mut self, key: impl Into<String>, meta: &ObjectMeta) -> MetaResult<()> {
        let key = key.into();
        match meta.id {
            Some(id) if meta.sealed => self.insert_member(
                key,
                Member {
                    id,
                    meta: Some(Arc::new(meta.clone())),
                },
            ),
            _ => Err(MetaError::UnsealedMember(key)),
        }
    }

    fn insert_member(&mut self, key: String, member: Member) -> MetaResult<()> {
        self.ensure_unsealed()?;
        if self.properties.contains_key(&key) {
            return Err(MetaError::KeyConflict(key));
        }
        self.members.insert(key, member);
        Ok(())
    }

    fn ensure_unsealed(&self) -> MetaResult<()> {
        if self.sealed {
            return Err(MetaError::Sealed(self.label()));
        }
        Ok(())
    }

    fn label(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => format!("<{}>", self.typename),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The store-assigned id; `None` until created.
    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    /// The instance that owns this object; unspecified until created.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns `true` if this object lives on `instance`.
    pub fn is_local_to(&self, instance: InstanceId) -> bool {
        !instance.is_unspecified() && self.instance_id == instance
    }

    /// Returns `true` if `key` names a property or a member.
    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key) || self.members.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.properties.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetaValue::as_int)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(MetaValue::as_bool)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn member_id(&self, key: &str) -> Option<ObjectId> {
        self.members.get(key).map(Member::id)
    }

    /// The resolved descriptor of member `key`, if available.
    pub fn member(&self, key: &str) -> Option<&ObjectMeta> {
        self.members.get(key).and_then(Member::meta)
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.members.iter().map(|(k, m)| (k.as_str(), m))
    }

    /// Member ids without a sealed snapshot attached, deduplicated.
    pub fn unresolved_members(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .members
            .values()
            .filter(|m| !m.is_resolved())
            .map(Member::id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // -----------------------------------------------------------------------
    // Record conversion
    // -----------------------------------------------------------------------

    /// Flatten into the wire form.
    pub fn to_record(&self) -> MetaRecord {
        MetaRecord {
            id: self.id,
            instance_id: self.instance_id,
            typename: self.typename.clone(),
            properties: self.properties.clone(),
            members: self
                .members
                .iter()
                .map(|(k, m)| (k.clone(), m.id))
                .collect(),
            sealed: self.sealed,
        }
    }

    /// Rebuild the tree rooted at `root` from a set of records.
    ///
    /// Members whose record is absent stay unresolved. Use a [`Resolver`]
    /// to build several trees that share snapshots.
    pub fn from_records(root: ObjectId, records: &BTreeMap<ObjectId, MetaRecord>) -> MetaResult<Self> {
        Resolver::new(records).resolve_owned(root)
    }

    fn from_resolved(record: &MetaRecord, resolved: &HashMap<ObjectId, Arc<ObjectMeta>>) -> Self {
        let members = record
            .members
            .iter()
            .map(|(key, id)| {
                let meta = resolved.get(id).cloned();
                (key.clone(), Member { id: *id, meta })
            })
            .collect();
        Self {
            id: record.id,
            instance_id: record.instance_id,
            typename: record.typename.clone(),
            properties: record.properties.clone(),
            members,
            sealed: record.sealed,
        }
    }

    /// Combine the record a store returned for `submitted` with the member
    /// snapshots the caller attached while building.
    pub fn from_created(record: MetaRecord, submitted: &ObjectMeta) -> Self {
        let members = record
            .members
            .iter()
            .map(|(key, id)| {
                let meta = submitted
                    .members
                    .get(key)
                    .filter(|m| m.id == *id)
                    .and_then(|m| m.meta.clone());
                (key.clone(), Member { id: *id, meta })
            })
            .collect();
        Self {
            id: record.id,
            instance_id: record.instance_id,
            typename: record.typename,
            properties: record.properties,
            members,
            sealed: record.sealed,
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// JSON view: properties inline, members nested up to [`JSON_DEPTH`]
    /// levels.
    pub fn to_json(&self) -> Value {
        self.json_at(0)
    }

    fn json_at(&self, depth: usize) -> Value {
        let mut map = Map::new();
        map.insert(
            "id".into(),
            self.id
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(Value::Null),
        );
        map.insert(
            "instance_id".into(),
            Value::String(self.instance_id.to_string()),
        );
        map.insert("typename".into(), Value::String(self.typename.clone()));
        map.insert("sealed".into(), Value::Bool(self.sealed));
        for (key, value) in &self.properties {
            map.insert(key.clone(), value.to_json());
        }
        for (key, member) in &self.members {
            let rendered = match member.meta() {
                Some(meta) if depth < JSON_DEPTH => meta.json_at(depth + 1),
                _ => serde_json::json!({ "id": member.id.to_string() }),
            };
            map.insert(key.clone(), rendered);
        }
        Value::Object(map)
    }
}

impl Drop for ObjectMeta {
    /// Unlinks nested snapshots with a work list; a destructor call per level
    /// would overflow the stack on long member chains.
    fn drop(&mut self) {
        let mut pending = take_snapshots(&mut self.members);
        while let Some(snapshot) = pending.pop() {
            if let Ok(mut inner) = Arc::try_unwrap(snapshot) {
                pending.extend(take_snapshots(&mut inner.members));
            }
        }
    }
}

fn take_snapshots(members: &mut BTreeMap<String, Member>) -> Vec<Arc<ObjectMeta>> {
    std::mem::take(members)
        .into_values()
        .filter_map(|member| member.meta)
        .collect()
}

/// Rebuilds descriptor trees from a flat set of records.
///
/// Every record is materialized at most once per resolver, and every member
/// that references it shares that snapshot, so shared sub-objects cost one
/// node however often they are referenced. Resolution walks an explicit
/// stack; chain depth is limited by memory, not by the call stack.
pub struct Resolver<'a> {
    records: &'a BTreeMap<ObjectId, MetaRecord>,
    resolved: HashMap<ObjectId, Arc<ObjectMeta>>,
}

impl<'a> Resolver<'a> {
    pub fn new(records: &'a BTreeMap<ObjectId, MetaRecord>) -> Self {
        Self {
            records,
            resolved: HashMap::new(),
        }
    }

    /// The snapshot rooted at `root`, building any record not built yet.
    ///
    /// Members without a record stay unresolved. A member that would close a
    /// cycle is left unresolved as well.
    pub fn resolve(&mut self, root: ObjectId) -> MetaResult<Arc<ObjectMeta>> {
        let records = self.records;
        if !records.contains_key(&root) {
            return Err(MetaError::MissingRecord(root));
        }
        let mut stack = vec![(root, false)];
        let mut open = HashSet::new();
        while let Some((id, expanded)) = stack.pop() {
            if self.resolved.contains_key(&id) {
                continue;
            }
            let Some(record) = records.get(&id) else {
                continue;
            };
            if expanded {
                open.remove(&id);
                let meta = ObjectMeta::from_resolved(record, &self.resolved);
                self.resolved.insert(id, Arc::new(meta));
            } else if open.insert(id) {
                stack.push((id, true));
                for member in record.members.values() {
                    if !self.resolved.contains_key(member) && !open.contains(member) {
                        stack.push((*member, false));
                    }
                }
            }
        }
        self.resolved
            .get(&root)
            .cloned()
            .ok_or(MetaError::MissingRecord(root))
    }

    /// Like [`Resolver::resolve`], returning an owned descriptor whose
    /// members still share snapshots with the resolver.
    pub fn resolve_owned(&mut self, root: ObjectId) -> MetaResult<ObjectMeta> {
        self.resolve(root).map(|meta| (*meta).clone())
    }
}

impl fmt::Display for ObjectMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self.to_json()).map_err(|_| fmt::Error)?;
        write!(f, "ObjectMeta {json}")
    }
}
