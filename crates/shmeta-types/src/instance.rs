use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of one store instance (a process hosting a shared-memory
/// segment) within the cluster.
///
/// Stable for the lifetime of the instance. The cluster hands a released id
/// to a new instance only after the previous holder deregistered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Sentinel meaning "unknown or any instance".
    pub const UNSPECIFIED: Self = Self(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn is_unspecified(&self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({self})")
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unspecified() {
            f.write_str("unspecified")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for InstanceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "unspecified" {
            return Ok(Self::UNSPECIFIED);
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::InvalidInstanceId(s.to_string()))
    }
}
