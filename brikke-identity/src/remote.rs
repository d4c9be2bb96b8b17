//! External coordination boundaries.
//!
//! Two seams are defined here and deliberately kept narrow: the coordination
//! backend used for cluster-wide numbering, and the watch contract through
//! which identities created in peer clusters reach the local view. Wire
//! transports live behind these traits and are not part of this crate.

use crate::error::IdentityError;
use crate::model::{IdentityMap, LabelSet, NumericIdentity};

/// Coordination backend for cluster-wide identity numbering.
///
/// Keys written on behalf of this node carry the node suffix so that a
/// node's claims can be garbage-collected if it disappears.
pub trait ClusterBackend: Send + Sync {
    /// Blocks until the backend is reachable and usable, or fails.
    fn ready(&self) -> Result<(), IdentityError>;

    /// Assigns or reuses the cluster-wide numeric identity for the label
    /// set, recording this node's claim.
    fn allocate(
        &self,
        labels: &LabelSet,
        node_suffix: &str,
    ) -> Result<NumericIdentity, IdentityError>;

    /// Withdraws this node's claim on the numeric identity.
    fn release(&self, numeric: NumericIdentity, node_suffix: &str) -> Result<(), IdentityError>;

    /// Releases backend resources. Must be safe to call at any point.
    fn close(&self);
}

/// Watch contract for identities originating in peer clusters.
///
/// Implemented by the allocator; driven by the (out-of-scope) cluster-mesh
/// transport. Merged entries are re-scoped to `IdentityScope::Remote` and
/// flow through the same change-propagation path as local allocations.
pub trait RemoteIdentityWatcher: Send + Sync {
    /// Merges a change batch observed in the named peer cluster into the
    /// local view.
    fn watch_remote_identities(&self, cluster: &str, added: IdentityMap, deleted: IdentityMap);

    /// Drops every identity previously learned from the named peer cluster.
    fn remove_remote_identities(&self, cluster: &str);
}
