//! Stand-in allocator for processes running with network policy disabled.
//!
//! Every operation trivially succeeds: nothing is allocated, persisted, or
//! propagated. Callers are written against one allocator surface regardless
//! of whether policy enforcement is active.

use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver};
use tokio::sync::broadcast;

use crate::checkpoint::CheckpointStore;
use crate::error::IdentityError;
use crate::model::{
    Identity, IdentityChange, IdentityMap, IdentityScope, LabelSet, NumericIdentity,
    UNKNOWN_IDENTITY,
};
use crate::remote::{ClusterBackend, RemoteIdentityWatcher};

pub struct NoopIdentityAllocator {
    events: broadcast::Sender<IdentityChange>,
}

impl Default for NoopIdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopIdentityAllocator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }

    /// Never allocates; hands back the unknown identity with no refcount.
    pub fn allocate(&self, labels: &LabelSet) -> Result<Identity, IdentityError> {
        Ok(Identity {
            numeric: UNKNOWN_IDENTITY,
            labels: labels.clone(),
            scope: IdentityScope::Local,
            refcount: 0,
        })
    }

    pub fn release(&self, _numeric: NumericIdentity) -> Result<(), IdentityError> {
        Ok(())
    }

    pub fn lookup(&self, _numeric: NumericIdentity) -> Option<Identity> {
        None
    }

    pub fn enable_checkpointing(&self, _store: CheckpointStore) {}

    pub fn restore_local_identities(&self) -> Result<IdentityMap, IdentityError> {
        Ok(IdentityMap::new())
    }

    pub fn release_restored_identities(&self) {}

    /// Reports ready immediately; the backend is never touched.
    pub fn init_identity_allocator(&self, _backend: Arc<dyn ClusterBackend>) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        let _ = tx.send(());
        rx
    }

    /// A stream that never yields anything.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        self.events.subscribe()
    }

    pub fn close(&self) {}
}

impl RemoteIdentityWatcher for NoopIdentityAllocator {
    fn watch_remote_identities(&self, _cluster: &str, _added: IdentityMap, _deleted: IdentityMap) {}

    fn remove_remote_identities(&self, _cluster: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn never_allocates_or_propagates() {
        let allocator = NoopIdentityAllocator::new();
        let mut stream = allocator.subscribe();

        let identity = allocator
            .allocate(&LabelSet::new(["app=ignored"]))
            .unwrap();
        assert_eq!(identity.numeric, UNKNOWN_IDENTITY);
        assert_eq!(identity.refcount, 0);

        allocator.release(identity.numeric).unwrap();
        assert!(allocator.lookup(identity.numeric).is_none());

        assert!(allocator.restore_local_identities().unwrap().is_empty());
        allocator.release_restored_identities();
        allocator.close();

        assert!(matches!(stream.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn checkpointing_is_inert() {
        let dir = std::env::temp_dir().join(format!("brikke-noop-{}", std::process::id()));
        let store = CheckpointStore::new(dir.clone());
        let path = store.path();

        let allocator = NoopIdentityAllocator::new();
        allocator.enable_checkpointing(store);
        allocator
            .allocate(&LabelSet::new(["app=ignored"]))
            .unwrap();
        allocator.close();

        assert!(!path.exists());
    }

    #[test]
    fn init_reports_ready_without_a_backend_roundtrip() {
        struct PanickingBackend;
        impl ClusterBackend for PanickingBackend {
            fn ready(&self) -> Result<(), IdentityError> {
                panic!("backend must not be touched")
            }
            fn allocate(
                &self,
                _labels: &LabelSet,
                _node_suffix: &str,
            ) -> Result<NumericIdentity, IdentityError> {
                panic!("backend must not be touched")
            }
            fn release(
                &self,
                _numeric: NumericIdentity,
                _node_suffix: &str,
            ) -> Result<(), IdentityError> {
                panic!("backend must not be touched")
            }
            fn close(&self) {}
        }

        let allocator = NoopIdentityAllocator::new();
        let ready = allocator.init_identity_allocator(Arc::new(PanickingBackend));
        ready.recv().expect("trivially ready");
    }
}
