use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::instance::InstanceId;

/// Width of the owning-instance field inside an [`ObjectId`].
pub const INSTANCE_BITS: u32 = 10;
/// Width of the per-instance sequence field inside an [`ObjectId`].
pub const SEQUENCE_BITS: u32 = 53;
/// Largest raw instance id that can own objects.
pub const MAX_INSTANCE: u64 = (1 << INSTANCE_BITS) - 1;

const BLOB_FLAG: u64 = 1 << 63;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Cluster-unique identifier of a stored object.
///
/// Ids are assigned by the store instance that creates the object, never by
/// clients. The layout is:
///
/// ```text
///  63   62 ........ 53   52 ............................ 0
/// [blob][ owning instance ][ per-instance sequence        ]
/// ```
///
/// Embedding the owner keeps ids unique across the cluster without any
/// cross-instance coordination on the create path. The value carries no other
/// meaning; ordering exists only for deterministic iteration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Wrap a raw 64-bit value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Build a metadata object id from its owner and sequence number.
    pub fn compose(instance: InstanceId, sequence: u64) -> Result<Self, TypeError> {
        let owner = instance_bits(instance)?;
        Ok(Self((owner << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK)))
    }

    /// Build a blob id (a raw payload region) from its owner and sequence number.
    pub fn compose_blob(instance: InstanceId, sequence: u64) -> Result<Self, TypeError> {
        Self::compose(instance, sequence).map(|id| Self(id.0 | BLOB_FLAG))
    }

    /// Returns `true` if this id names a raw payload region rather than a
    /// metadata descriptor.
    pub const fn is_blob(&self) -> bool {
        self.0 & BLOB_FLAG != 0
    }

    /// The instance that assigned this id.
    pub const fn instance(&self) -> InstanceId {
        InstanceId::new((self.0 & !BLOB_FLAG) >> SEQUENCE_BITS)
    }

    /// The per-instance sequence number.
    pub const fn sequence(&self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

fn instance_bits(instance: InstanceId) -> Result<u64, TypeError> {
    if instance.raw() > MAX_INSTANCE {
        return Err(TypeError::InstanceOutOfRange(instance.raw()));
    }
    Ok(instance.raw())
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{:016x}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    /// Parse the rendered form (`o` followed by up to 16 hex digits). The `o`
    /// prefix is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('o').unwrap_or(s);
        if digits.is_empty() || digits.len() > 16 {
            return Err(TypeError::InvalidObjectId(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| TypeError::InvalidObjectId(s.to_string()))
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compose_embeds_owner_and_sequence() {
        let id = ObjectId::compose(InstanceId::new(3), 42).unwrap();
        assert_eq!(id.instance(), InstanceId::new(3));
        assert_eq!(id.sequence(), 42);
        assert!(!id.is_blob());
    }

    #[test]
    fn blob_flag_is_separate_from_owner() {
        let id = ObjectId::compose_blob(InstanceId::new(MAX_INSTANCE), 7).unwrap();
        assert!(id.is_blob());
        assert_eq!(id.instance(), InstanceId::new(MAX_INSTANCE));
        assert_eq!(id.sequence(), 7);
    }

    #[test]
    fn compose_rejects_wide_instance() {
        let err = ObjectId::compose(InstanceId::new(MAX_INSTANCE + 1), 1).unwrap_err();
        assert_eq!(err, TypeError::InstanceOutOfRange(MAX_INSTANCE + 1));
        assert!(ObjectId::compose(InstanceId::UNSPECIFIED, 1).is_err());
    }

    #[test]
    fn display_is_prefixed_fixed_width_hex() {
        let id = ObjectId::from_raw(0x43c5c6d5e646);
        assert_eq!(id.to_string(), "o000043c5c6d5e646");
        assert_eq!(format!("{id:?}"), "ObjectId(o000043c5c6d5e646)");
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id: ObjectId = "o000043c5c6d5e646".parse().unwrap();
        assert_eq!(id.raw(), 0x43c5c6d5e646);
        let id: ObjectId = "ff".parse().unwrap();
        assert_eq!(id.raw(), 0xff);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<ObjectId>().is_err());
        assert!("o".parse::<ObjectId>().is_err());
        assert!("oxyz".parse::<ObjectId>().is_err());
        assert!("o00000000000000000".parse::<ObjectId>().is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let id = ObjectId::from_raw(99);
        assert_eq!(serde_json::to_string(&id).unwrap(), "99");
        let parsed: ObjectId = serde_json::from_str("99").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(ObjectId::from_raw(1) < ObjectId::from_raw(2));
    }

    proptest! {
        #[test]
        fn rendering_parses_back(raw in any::<u64>()) {
            let id = ObjectId::from_raw(raw);
            let parsed: ObjectId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn distinct_sequences_give_distinct_ids(owner in 0..=MAX_INSTANCE, a in 1u64..1 << 40, b in 1u64..1 << 40) {
            prop_assume!(a != b);
            let owner = InstanceId::new(owner);
            prop_assert_ne!(ObjectId::compose(owner, a).unwrap(), ObjectId::compose(owner, b).unwrap());
        }
    }
}
