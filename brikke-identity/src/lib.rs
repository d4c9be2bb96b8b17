//! # brikke-identity
//!
//! Identity allocation and change propagation for the Brikke data plane.
//! Maps workload label sets to compact numeric identities with exact
//! reference counting, persists the local map across restarts, and fans
//! identity changes out to policy consumers with a strict two-phase
//! ordering barrier.
//!
//! ### Key Submodules:
//! - `allocator`: refcounted label-set to numeric-identity cache
//! - `checkpoint`: crash-safe snapshot of the local identity map
//! - `owner`: change fan-out with the selector-cache-last barrier
//! - `remote`: coordination backend and peer-cluster watch contracts

pub mod allocator;
pub mod checkpoint;
pub mod error;
pub mod model;
pub mod noop;
pub mod owner;
pub mod remote;
pub mod sync;

use std::sync::Arc;

use crossbeam::channel::Receiver;
use tokio::sync::broadcast;

use crate::allocator::{AllocatorConfig, CachingIdentityAllocator};
use crate::checkpoint::CheckpointStore;
use crate::error::IdentityError;
use crate::model::{Identity, IdentityChange, IdentityMap, LabelSet, NumericIdentity};
use crate::noop::NoopIdentityAllocator;
use crate::owner::AllocatorOwner;
use crate::remote::{ClusterBackend, RemoteIdentityWatcher};

pub mod prelude {
    pub use crate::allocator::{AllocatorConfig, CachingIdentityAllocator};
    pub use crate::checkpoint::CheckpointStore;
    pub use crate::error::IdentityError;
    pub use crate::model::*;
    pub use crate::noop::NoopIdentityAllocator;
    pub use crate::owner::{
        AllocatorOwner, IdentityAllocatorOwner, IdentityChangeHandler, PolicyTrigger,
    };
    pub use crate::remote::{ClusterBackend, RemoteIdentityWatcher};
    pub use crate::sync::{CompletionGuard, WaitGroup};
    pub use crate::IdentityAllocator;
}

/// The allocator variants selectable at startup.
///
/// A closed set chosen once from configuration: the full caching allocator
/// when the network-policy subsystem is active, the no-op stand-in when it
/// is not. Not runtime-polymorphic per call.
pub enum IdentityAllocator {
    Caching(CachingIdentityAllocator),
    Noop(NoopIdentityAllocator),
}

impl IdentityAllocator {
    /// Selects the variant for this process.
    pub fn new(
        network_policy_enabled: bool,
        owner: Arc<dyn AllocatorOwner>,
        config: AllocatorConfig,
        metrics: Arc<brikke_telemetry::MetricsRecorder>,
    ) -> Self {
        if network_policy_enabled {
            Self::Caching(CachingIdentityAllocator::new(owner, config, metrics))
        } else {
            Self::Noop(NoopIdentityAllocator::new())
        }
    }

    pub fn allocate(&self, labels: &LabelSet) -> Result<Identity, IdentityError> {
        match self {
            Self::Caching(allocator) => allocator.allocate(labels),
            Self::Noop(allocator) => allocator.allocate(labels),
        }
    }

    pub fn release(&self, numeric: NumericIdentity) -> Result<(), IdentityError> {
        match self {
            Self::Caching(allocator) => allocator.release(numeric),
            Self::Noop(allocator) => allocator.release(numeric),
        }
    }

    pub fn lookup(&self, numeric: NumericIdentity) -> Option<Identity> {
        match self {
            Self::Caching(allocator) => allocator.lookup(numeric),
            Self::Noop(allocator) => allocator.lookup(numeric),
        }
    }

    pub fn enable_checkpointing(&self, store: CheckpointStore) {
        match self {
            Self::Caching(allocator) => allocator.enable_checkpointing(store),
            Self::Noop(allocator) => allocator.enable_checkpointing(store),
        }
    }

    pub fn restore_local_identities(&self) -> Result<IdentityMap, IdentityError> {
        match self {
            Self::Caching(allocator) => allocator.restore_local_identities(),
            Self::Noop(allocator) => allocator.restore_local_identities(),
        }
    }

    pub fn release_restored_identities(&self) {
        match self {
            Self::Caching(allocator) => allocator.release_restored_identities(),
            Self::Noop(allocator) => allocator.release_restored_identities(),
        }
    }

    pub fn init_identity_allocator(&self, backend: Arc<dyn ClusterBackend>) -> Receiver<()> {
        match self {
            Self::Caching(allocator) => allocator.init_identity_allocator(backend),
            Self::Noop(allocator) => allocator.init_identity_allocator(backend),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        match self {
            Self::Caching(allocator) => allocator.subscribe(),
            Self::Noop(allocator) => allocator.subscribe(),
        }
    }

    pub fn close(&self) {
        match self {
            Self::Caching(allocator) => allocator.close(),
            Self::Noop(allocator) => allocator.close(),
        }
    }
}

impl RemoteIdentityWatcher for IdentityAllocator {
    fn watch_remote_identities(&self, cluster: &str, added: IdentityMap, deleted: IdentityMap) {
        match self {
            Self::Caching(allocator) => allocator.watch_remote_identities(cluster, added, deleted),
            Self::Noop(allocator) => allocator.watch_remote_identities(cluster, added, deleted),
        }
    }

    fn remove_remote_identities(&self, cluster: &str) {
        match self {
            Self::Caching(allocator) => allocator.remove_remote_identities(cluster),
            Self::Noop(allocator) => allocator.remove_remote_identities(cluster),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UNKNOWN_IDENTITY;

    struct InertOwner;

    impl AllocatorOwner for InertOwner {
        fn update_identities(&self, _added: &IdentityMap, _deleted: &IdentityMap) {}

        fn node_suffix(&self) -> Result<String, IdentityError> {
            Ok("192.0.2.1".into())
        }
    }

    #[test]
    fn selection_follows_policy_switch() {
        let metrics = Arc::new(brikke_telemetry::MetricsRecorder::new());
        let full = IdentityAllocator::new(
            true,
            Arc::new(InertOwner),
            AllocatorConfig::default(),
            metrics.clone(),
        );
        let noop = IdentityAllocator::new(
            false,
            Arc::new(InertOwner),
            AllocatorConfig::default(),
            metrics,
        );

        let labels = LabelSet::new(["app=select"]);
        let from_full = full.allocate(&labels).unwrap();
        assert_ne!(from_full.numeric, UNKNOWN_IDENTITY);
        assert_eq!(from_full.refcount, 1);

        let from_noop = noop.allocate(&labels).unwrap();
        assert_eq!(from_noop.numeric, UNKNOWN_IDENTITY);
        assert!(noop.lookup(UNKNOWN_IDENTITY).is_none());
    }
}
