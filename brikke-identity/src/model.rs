//! Identity model types and the numeric identity layout.
//!
//! A numeric identity is the compact fast-path stand-in for a workload label
//! set. The numbering plan splits the 32-bit space into well-known reserved
//! entries, a cluster-wide range, and a node-local range marked by bit 24.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Largest numeric value reserved for well-known identities.
pub const RESERVED_SCOPE_MAX: u32 = 255;

/// First numeric value available for cluster-wide allocation.
pub const CLUSTER_SCOPE_MIN: u32 = 256;

/// Last numeric value available for cluster-wide allocation.
pub const CLUSTER_SCOPE_MAX: u32 = 0x00FF_FFFF;

/// Bit marking an identity as node-local. Local identities never leave the
/// process and never collide with cluster-scope numbering.
pub const LOCAL_SCOPE_FLAG: u32 = 1 << 24;

/// Placeholder numeric returned when no allocation has taken place.
pub const UNKNOWN_IDENTITY: NumericIdentity = NumericIdentity(0);

/// Compact integer standing in for a label set on the fast path.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NumericIdentity(pub u32);

impl NumericIdentity {
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether the numeric value lies in the node-local range.
    pub fn is_local(&self) -> bool {
        self.0 & LOCAL_SCOPE_FLAG != 0
    }

    /// Whether the numeric value names a well-known reserved identity.
    pub fn is_reserved(&self) -> bool {
        self.0 > 0 && self.0 <= RESERVED_SCOPE_MAX
    }
}

impl fmt::Display for NumericIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of workload attributes an identity represents.
///
/// Labels are `key=value` strings kept in a deterministic order so equal sets
/// compare equal regardless of insertion order.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl FromIterator<String> for LabelSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for label in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", label)?;
            first = false;
        }
        Ok(())
    }
}

/// Where an identity is meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityScope {
    /// Known only to this process.
    Local,
    /// Shared across this cluster through the coordination backend.
    Cluster,
    /// Learned from a peer cluster.
    Remote,
    /// Well-known, fixed numbering.
    Reserved,
}

/// A numeric identity together with the label set it stands for.
///
/// The refcount is a live view owned by the allocator; clones returned from
/// allocation or lookup carry the value at the time of the call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub numeric: NumericIdentity,
    pub labels: LabelSet,
    pub scope: IdentityScope,
    pub refcount: u32,
}

/// Mapping from numeric identity to identity, used both as live state and as
/// the change-batch payload.
pub type IdentityMap = HashMap<NumericIdentity, Identity>;

/// Direction of a single identity change on the observable stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
}

/// One element of the identity change stream exposed to external observers.
#[derive(Clone, Debug)]
pub struct IdentityChange {
    pub kind: ChangeKind,
    pub numeric: NumericIdentity,
    pub labels: LabelSet,
}

/// Well-known identities visible through lookup but never allocated,
/// released, or checkpointed.
pub static RESERVED_IDENTITIES: Lazy<HashMap<NumericIdentity, Identity>> = Lazy::new(|| {
    [(1, "host"), (2, "world"), (4, "health"), (8, "ingress")]
        .into_iter()
        .map(|(numeric, name)| {
            let numeric = NumericIdentity(numeric);
            (
                numeric,
                Identity {
                    numeric,
                    labels: LabelSet::new([format!("reserved:{name}")]),
                    scope: IdentityScope::Reserved,
                    refcount: 1,
                },
            )
        })
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_sets_compare_order_independently() {
        let a = LabelSet::new(["app=foo", "env=prod"]);
        let b = LabelSet::new(["env=prod", "app=foo"]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "app=foo,env=prod");
    }

    #[test]
    fn numeric_scope_ranges() {
        assert!(NumericIdentity(LOCAL_SCOPE_FLAG | 7).is_local());
        assert!(!NumericIdentity(CLUSTER_SCOPE_MIN).is_local());
        assert!(NumericIdentity(1).is_reserved());
        assert!(!NumericIdentity(CLUSTER_SCOPE_MIN).is_reserved());
        assert!(!UNKNOWN_IDENTITY.is_reserved());
    }

    #[test]
    fn reserved_table_is_wellformed() {
        let host = RESERVED_IDENTITIES
            .get(&NumericIdentity(1))
            .expect("host identity");
        assert_eq!(host.scope, IdentityScope::Reserved);
        assert!(host.labels.contains("reserved:host"));
    }
}
