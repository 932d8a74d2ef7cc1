use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shmeta_types::{InstanceId, ObjectId};

use crate::value::MetaValue;

/// Typename reported for raw payload regions.
pub const BLOB_TYPENAME: &str = "blob";

/// Flat form of a descriptor: members are plain ids.
///
/// This is what travels on the wire and what a store instance keeps in its
/// namespace. Trees of [`ObjectMeta`](crate::ObjectMeta) are rebuilt from a
/// set of records on the client side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub id: Option<ObjectId>,
    pub instance_id: InstanceId,
    pub typename: String,
    pub properties: BTreeMap<String, MetaValue>,
    pub members: BTreeMap<String, ObjectId>,
    pub sealed: bool,
}

impl MetaRecord {
    /// Record describing a registered payload region.
    pub fn blob(id: ObjectId, instance_id: InstanceId, nbytes: u64) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            "nbytes".to_string(),
            MetaValue::Int(i64::try_from(nbytes).unwrap_or(i64::MAX)),
        );
        Self {
            id: Some(id),
            instance_id,
            typename: BLOB_TYPENAME.to_string(),
            properties,
            members: BTreeMap::new(),
            sealed: true,
        }
    }

    /// Ids of all direct members, in key order.
    pub fn member_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.members.values().copied()
    }

    /// Returns `true` if `id` is a direct member.
    pub fn references(&self, id: ObjectId) -> bool {
        self.members.values().any(|m| *m == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_record_is_sealed_with_size() {
        let id = ObjectId::compose_blob(InstanceId::new(0), 1).unwrap();
        let rec = MetaRecord::blob(id, InstanceId::new(0), 128);
        assert!(rec.sealed);
        assert_eq!(rec.typename, BLOB_TYPENAME);
        assert_eq!(rec.properties.get("nbytes"), Some(&MetaValue::Int(128)));
        assert!(rec.members.is_empty());
    }

    #[test]
    fn references_checks_member_values() {
        let a = ObjectId::from_raw(1);
        let b = ObjectId::from_raw(2);
        let mut members = BTreeMap::new();
        members.insert("first".to_string(), a);
        let rec = MetaRecord {
            id: None,
            instance_id: InstanceId::UNSPECIFIED,
            typename: "pair".into(),
            properties: BTreeMap::new(),
            members,
            sealed: false,
        };
        assert!(rec.references(a));
        assert!(!rec.references(b));
        assert_eq!(rec.member_ids().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn bincode_roundtrip() {
        let id = ObjectId::compose_blob(InstanceId::new(2), 9).unwrap();
        let rec = MetaRecord::blob(id, InstanceId::new(2), 4);
        let bytes = bincode::serialize(&rec).unwrap();
        let back: MetaRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, rec);
    }
}
