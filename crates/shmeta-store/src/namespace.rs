use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use shmeta_meta::MetaRecord;
use shmeta_types::ObjectId;

/// The set of sealed records visible to one instance.
///
/// Records are kept with their insertion position so enumeration follows the
/// order in which the instance observed them. Not synchronized; the owning
/// instance guards it.
#[derive(Debug, Default)]
pub struct Namespace {
    records: HashMap<ObjectId, (u64, MetaRecord)>,
    order: BTreeMap<u64, ObjectId>,
    next_position: u64,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&MetaRecord> {
        self.records.get(id).map(|(_, record)| record)
    }

    /// Insert a sealed record. Returns `false` and keeps the existing record
    /// if the id is already present, or if the record has no id.
    pub fn insert(&mut self, record: MetaRecord) -> bool {
        let Some(id) = record.id else {
            return false;
        };
        if self.records.contains_key(&id) {
            return false;
        }
        let position = self.next_position;
        self.next_position += 1;
        self.order.insert(position, id);
        self.records.insert(id, (position, record));
        true
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<MetaRecord> {
        let (position, record) = self.records.remove(id)?;
        self.order.remove(&position);
        Some(record)
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MetaRecord> {
        self.order
            .values()
            .filter_map(|id| self.records.get(id).map(|(_, record)| record))
    }

    /// Ids among `ids` that are not present.
    pub fn missing(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        let mut missing: Vec<ObjectId> = ids.iter().filter(|id| !self.contains(id)).copied().collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Ids of the present records that list `id` as a member.
    pub fn referrers(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut referrers: Vec<ObjectId> = self
            .records
            .iter()
            .filter(|(_, (_, record))| record.references(id))
            .map(|(rid, _)| *rid)
            .collect();
        referrers.sort();
        referrers
    }

    /// `roots` plus every record reachable from them through members, each
    /// once. Members that are not present are skipped.
    pub fn closure(&self, roots: &[ObjectId]) -> Vec<MetaRecord> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();
        let mut out = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(record) = self.get(&id) {
                queue.extend(record.member_ids());
                out.push(record.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmeta_types::InstanceId;

    fn record(id: u64, members: &[(&str, u64)]) -> MetaRecord {
        MetaRecord {
            id: Some(ObjectId::from_raw(id)),
            instance_id: InstanceId::new(0),
            typename: "t".into(),
            properties: BTreeMap::new(),
            members: members
                .iter()
                .map(|(k, v)| (k.to_string(), ObjectId::from_raw(*v)))
                .collect(),
            sealed: true,
        }
    }

    // -----------------------------------------------------------------------
    // Insert / remove
    // -----------------------------------------------------------------------

    #[test]
    fn insert_is_first_wins() {
        let mut ns = Namespace::new();
        assert!(ns.insert(record(1, &[])));
        let mut other = record(1, &[]);
        other.typename = "other".into();
        assert!(!ns.insert(other));
        assert_eq!(ns.get(&ObjectId::from_raw(1)).unwrap().typename, "t");
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn insert_without_id_is_rejected() {
        let mut ns = Namespace::new();
        let mut rec = record(1, &[]);
        rec.id = None;
        assert!(!ns.insert(rec));
        assert!(ns.is_empty());
    }

    #[test]
    fn remove_drops_from_order() {
        let mut ns = Namespace::new();
        ns.insert(record(1, &[]));
        ns.insert(record(2, &[]));
        ns.insert(record(3, &[]));
        assert!(ns.remove(&ObjectId::from_raw(2)).is_some());
        assert!(ns.remove(&ObjectId::from_raw(2)).is_none());
        let ids: Vec<u64> = ns.iter().map(|r| r.id.unwrap().raw()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn iter_follows_insertion_not_id_order() {
        let mut ns = Namespace::new();
        ns.insert(record(30, &[]));
        ns.insert(record(10, &[]));
        ns.insert(record(20, &[]));
        let ids: Vec<u64> = ns.iter().map(|r| r.id.unwrap().raw()).collect();
        assert_eq!(ids, vec![30, 10, 20]);
    }

    // -----------------------------------------------------------------------
    // Graph queries
    // -----------------------------------------------------------------------

    #[test]
    fn closure_follows_members_once() {
        let mut ns = Namespace::new();
        ns.insert(record(1, &[]));
        ns.insert(record(2, &[("first", 1), ("second", 1)]));
        ns.insert(record(3, &[("pair", 2), ("leaf", 1)]));
        let closure = ns.closure(&[ObjectId::from_raw(3)]);
        let ids: Vec<u64> = closure.iter().map(|r| r.id.unwrap().raw()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn closure_skips_absent_members() {
        let mut ns = Namespace::new();
        ns.insert(record(2, &[("first", 99)]));
        assert_eq!(ns.closure(&[ObjectId::from_raw(2)]).len(), 1);
    }

    #[test]
    fn referrers_and_missing() {
        let mut ns = Namespace::new();
        ns.insert(record(1, &[]));
        ns.insert(record(2, &[("a", 1)]));
        ns.insert(record(3, &[("b", 1)]));
        let referrers: Vec<u64> = ns.referrers(ObjectId::from_raw(1)).iter().map(|i| i.raw()).collect();
        assert_eq!(referrers, vec![2, 3]);
        assert!(ns.referrers(ObjectId::from_raw(3)).is_empty());

        let missing = ns.missing(&[ObjectId::from_raw(5), ObjectId::from_raw(1), ObjectId::from_raw(5)]);
        assert_eq!(missing, vec![ObjectId::from_raw(5)]);
    }
}
