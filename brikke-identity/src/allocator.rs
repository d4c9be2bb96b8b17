//! Identity allocator core.
//!
//! Owns the label-set to numeric-identity mapping with exact reference
//! counting, local and cluster numbering, disk-backed checkpoint/restore,
//! and change-batch emission to the owner. All map and refcount mutation
//! happens under one state lock; a second emission lock is held across
//! mutation plus propagation so change batches reach consumers serialized
//! in mutation order while lookups stay cheap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::channel::{bounded, Receiver};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use brikke_telemetry::MetricsRecorder;

use crate::checkpoint::CheckpointStore;
use crate::error::IdentityError;
use crate::model::{
    ChangeKind, Identity, IdentityChange, IdentityMap, IdentityScope, LabelSet, NumericIdentity,
    LOCAL_SCOPE_FLAG, RESERVED_IDENTITIES,
};
use crate::owner::AllocatorOwner;
use crate::remote::{ClusterBackend, RemoteIdentityWatcher};

const CHANGE_STREAM_CAPACITY: usize = 1024;

/// Allocator construction parameters.
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Allocate cluster-wide identities through the coordination backend
    /// instead of node-local numbering.
    pub cluster_allocation: bool,

    /// An external controller owns cluster-scope identity lifecycle; this
    /// process never withdraws backend claims on release.
    pub operator_manages_identities: bool,

    /// Size of the local numeric space scanned before exhaustion.
    pub local_identity_capacity: usize,

    /// Write a checkpoint after every change to the live local set.
    pub save_on_change: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            cluster_allocation: false,
            operator_manages_identities: false,
            local_identity_capacity: 4096,
            save_on_change: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RestorePhase {
    Uninitialized,
    Restoring,
    Active,
}

struct AllocatorState {
    by_labels: HashMap<LabelSet, NumericIdentity>,
    by_id: IdentityMap,
    remote_by_cluster: HashMap<String, HashSet<NumericIdentity>>,
    next_local: u32,
    restore: RestorePhase,
    restored: HashSet<NumericIdentity>,
    closed: bool,
}

impl AllocatorState {
    fn new() -> Self {
        Self {
            by_labels: HashMap::new(),
            by_id: IdentityMap::new(),
            remote_by_cluster: HashMap::new(),
            next_local: 0,
            restore: RestorePhase::Uninitialized,
            restored: HashSet::new(),
            closed: false,
        }
    }
}

/// The full allocator: reference-counted identity cache with checkpointing
/// and change propagation.
pub struct CachingIdentityAllocator {
    owner: Arc<dyn AllocatorOwner>,
    config: AllocatorConfig,
    metrics: Arc<MetricsRecorder>,
    state: Mutex<AllocatorState>,
    // Held across mutation + propagation; serializes batch emission.
    emit: Mutex<()>,
    backend: Mutex<Option<Arc<dyn ClusterBackend>>>,
    checkpoint: Mutex<Option<CheckpointStore>>,
    events: broadcast::Sender<IdentityChange>,
}

impl CachingIdentityAllocator {
    pub fn new(
        owner: Arc<dyn AllocatorOwner>,
        config: AllocatorConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let (events, _) = broadcast::channel(CHANGE_STREAM_CAPACITY);
        Self {
            owner,
            config,
            metrics,
            state: Mutex::new(AllocatorState::new()),
            emit: Mutex::new(()),
            backend: Mutex::new(None),
            checkpoint: Mutex::new(None),
            events,
        }
    }

    /// Enables disk-backed checkpointing of the local identity map.
    pub fn enable_checkpointing(&self, store: CheckpointStore) {
        *self.checkpoint.lock() = Some(store);
    }

    /// Assigns or reuses the identity for the label set, incrementing its
    /// refcount. The call returns only after any resulting change batch has
    /// fully propagated.
    pub fn allocate(&self, labels: &LabelSet) -> Result<Identity, IdentityError> {
        let _emit = self.emit.lock();

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(IdentityError::Closed);
            }
            if let Some(&numeric) = state.by_labels.get(labels) {
                let identity = state
                    .by_id
                    .get_mut(&numeric)
                    .ok_or(IdentityError::NotFound(numeric))?;
                identity.refcount += 1;
                self.metrics.allocations.inc();
                debug!(
                    "Reused identity {} for labels {} (refcount {})",
                    numeric, labels, identity.refcount
                );
                return Ok(identity.clone());
            }
        }

        let (numeric, scope) = if self.config.cluster_allocation {
            // The emission lock is still held, so no other mutation can
            // interleave while the backend call is in flight.
            let backend = self.backend.lock().clone().ok_or_else(|| {
                IdentityError::ScopeUnavailable("no coordination backend installed".into())
            })?;
            let suffix = self.owner.node_suffix()?;
            (backend.allocate(labels, &suffix)?, IdentityScope::Cluster)
        } else {
            let mut state = self.state.lock();
            (self.next_local_identity(&mut state)?, IdentityScope::Local)
        };

        let identity = Identity {
            numeric,
            labels: labels.clone(),
            scope,
            refcount: 1,
        };
        {
            let mut state = self.state.lock();
            state.by_labels.insert(labels.clone(), numeric);
            state.by_id.insert(numeric, identity.clone());
        }
        self.metrics.allocations.inc();
        self.metrics.live_identities.inc();
        info!("Allocated identity {} for labels {}", numeric, labels);

        let mut added = IdentityMap::new();
        added.insert(numeric, identity.clone());
        self.notify(&added, &IdentityMap::new());
        self.checkpoint_locals(false);
        Ok(identity)
    }

    /// Decrements the identity's refcount; at zero the identity is removed
    /// and the deletion propagated before the call returns.
    pub fn release(&self, numeric: NumericIdentity) -> Result<(), IdentityError> {
        let _emit = self.emit.lock();

        let removed = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(IdentityError::Closed);
            }
            let identity = state
                .by_id
                .get_mut(&numeric)
                .ok_or(IdentityError::NotFound(numeric))?;
            identity.refcount -= 1;
            self.metrics.releases.inc();
            if identity.refcount > 0 {
                debug!(
                    "Released reference on identity {} (refcount {})",
                    numeric, identity.refcount
                );
                return Ok(());
            }
            let identity = state
                .by_id
                .remove(&numeric)
                .ok_or(IdentityError::NotFound(numeric))?;
            state.by_labels.remove(&identity.labels);
            state.restored.remove(&numeric);
            identity
        };
        self.metrics.live_identities.dec();
        info!("Freed identity {} for labels {}", numeric, removed.labels);

        if removed.scope == IdentityScope::Cluster && !self.config.operator_manages_identities {
            if let Some(backend) = self.backend.lock().clone() {
                match self.owner.node_suffix() {
                    Ok(suffix) => {
                        if let Err(e) = backend.release(numeric, &suffix) {
                            warn!("Failed to withdraw backend claim on {}: {}", numeric, e);
                        }
                    }
                    Err(e) => {
                        warn!("Cannot withdraw backend claim on {}: {}", numeric, e);
                    }
                }
            }
        }

        let mut deleted = IdentityMap::new();
        deleted.insert(numeric, removed);
        self.notify(&IdentityMap::new(), &deleted);
        self.checkpoint_locals(false);
        Ok(())
    }

    /// Non-mutating read of a live or reserved identity.
    pub fn lookup(&self, numeric: NumericIdentity) -> Option<Identity> {
        if let Some(identity) = RESERVED_IDENTITIES.get(&numeric) {
            return Some(identity.clone());
        }
        self.state.lock().by_id.get(&numeric).cloned()
    }

    /// Rehydrates the local identity map from the checkpoint, seeding every
    /// restored entry with a refcount-1 restoration hold. Call once, before
    /// allocation traffic begins; release the holds with
    /// [`release_restored_identities`](Self::release_restored_identities)
    /// once real consumers have re-established their references.
    ///
    /// A missing checkpoint is a first run, not an error. A corrupt
    /// checkpoint is returned as an error for the caller to log, but the
    /// allocator proceeds with empty local state either way.
    pub fn restore_local_identities(&self) -> Result<IdentityMap, IdentityError> {
        let _emit = self.emit.lock();

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(IdentityError::Closed);
            }
            match state.restore {
                RestorePhase::Uninitialized => state.restore = RestorePhase::Restoring,
                _ => {
                    warn!("Local identity restoration requested more than once");
                    return Ok(IdentityMap::new());
                }
            }
        }

        let loaded = {
            let store = self.checkpoint.lock();
            match store.as_ref() {
                Some(store) => store.load(),
                None => {
                    self.state.lock().restore = RestorePhase::Active;
                    return Ok(IdentityMap::new());
                }
            }
        };

        let loaded = match loaded {
            Ok(map) => map,
            Err(IdentityError::CheckpointUnavailable(path)) => {
                info!("No identity checkpoint at {}; starting fresh", path.display());
                self.state.lock().restore = RestorePhase::Active;
                return Ok(IdentityMap::new());
            }
            Err(e) => {
                warn!("Identity checkpoint unreadable, starting fresh: {}", e);
                self.state.lock().restore = RestorePhase::Active;
                return Err(e);
            }
        };

        let mut restored = IdentityMap::new();
        {
            let mut state = self.state.lock();
            for (numeric, mut identity) in loaded {
                identity.scope = IdentityScope::Local;
                identity.refcount = 1; // restoration hold
                state.by_labels.insert(identity.labels.clone(), numeric);
                state.by_id.insert(numeric, identity.clone());
                state.restored.insert(numeric);
                restored.insert(numeric, identity);
            }
            state.restore = RestorePhase::Active;
        }

        if !restored.is_empty() {
            self.metrics.live_identities.add(restored.len() as f64);
            self.notify(&restored, &IdentityMap::new());
        }
        info!("Restored {} local identities from checkpoint", restored.len());
        Ok(restored)
    }

    /// Drops the restoration hold on every restored identity. Identities
    /// with no other holders are freed and their deletion propagated.
    /// Calling this again with nothing left to release is a no-op.
    pub fn release_restored_identities(&self) {
        let holds: Vec<NumericIdentity> = {
            let mut state = self.state.lock();
            state.restored.drain().collect()
        };
        if holds.is_empty() {
            debug!("No restored identities to release");
            return;
        }

        info!("Releasing {} restored identity holds", holds.len());
        for numeric in holds {
            if let Err(e) = self.release(numeric) {
                warn!("Failed to release restored identity {}: {}", numeric, e);
            }
        }
    }

    /// Installs the cluster coordination backend and probes its readiness on
    /// a background thread. The returned channel yields one unit when the
    /// backend is usable; it closes empty if the probe fails.
    pub fn init_identity_allocator(&self, backend: Arc<dyn ClusterBackend>) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        {
            let mut slot = self.backend.lock();
            if slot.is_some() {
                warn!("Cluster coordination backend replaced");
            }
            *slot = Some(Arc::clone(&backend));
        }

        thread::spawn(move || match backend.ready() {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => {
                warn!("Cluster coordination backend failed to become ready: {}", e);
            }
        });
        rx
    }

    /// Subscribes to the identity change stream. Slow subscribers may miss
    /// events; the stream is observational, not transactional.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        self.events.subscribe()
    }

    /// Stops accepting allocation traffic, flushes a final checkpoint, and
    /// releases backend resources. Safe to call after partial
    /// initialization, and idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.checkpoint_locals(true);
        if let Some(backend) = self.backend.lock().take() {
            backend.close();
        }
        info!("Identity allocator closed");
    }

    fn next_local_identity(
        &self,
        state: &mut AllocatorState,
    ) -> Result<NumericIdentity, IdentityError> {
        let capacity = self.config.local_identity_capacity as u32;
        for probe in 0..capacity {
            let offset = (state.next_local + probe) % capacity;
            let candidate = NumericIdentity(LOCAL_SCOPE_FLAG | offset);
            if !state.by_id.contains_key(&candidate) {
                state.next_local = (offset + 1) % capacity;
                return Ok(candidate);
            }
        }
        Err(IdentityError::AllocationExhausted)
    }

    /// Fans the batch out through the owner (two-phase, blocking) and then
    /// feeds the observational stream.
    fn notify(&self, added: &IdentityMap, deleted: &IdentityMap) {
        let start = Instant::now();
        self.owner.update_identities(added, deleted);
        self.metrics
            .propagation_latency
            .observe(start.elapsed().as_nanos() as f64);

        for identity in added.values() {
            let _ = self.events.send(IdentityChange {
                kind: ChangeKind::Added,
                numeric: identity.numeric,
                labels: identity.labels.clone(),
            });
        }
        for identity in deleted.values() {
            let _ = self.events.send(IdentityChange {
                kind: ChangeKind::Deleted,
                numeric: identity.numeric,
                labels: identity.labels.clone(),
            });
        }
    }

    fn checkpoint_locals(&self, force: bool) {
        if !force && !self.config.save_on_change {
            return;
        }
        let store = self.checkpoint.lock();
        let Some(store) = store.as_ref() else {
            return;
        };
        let locals: IdentityMap = {
            let state = self.state.lock();
            state
                .by_id
                .values()
                .filter(|identity| identity.scope == IdentityScope::Local)
                .map(|identity| (identity.numeric, identity.clone()))
                .collect()
        };
        if let Err(e) = store.save(&locals) {
            warn!("Failed to write identity checkpoint: {}", e);
        }
    }
}

impl RemoteIdentityWatcher for CachingIdentityAllocator {
    fn watch_remote_identities(&self, cluster: &str, added: IdentityMap, deleted: IdentityMap) {
        let _emit = self.emit.lock();

        let mut merged_added = IdentityMap::new();
        let mut merged_deleted = IdentityMap::new();
        let mut newly_live = 0usize;
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            for (numeric, mut identity) in added {
                identity.scope = IdentityScope::Remote;
                identity.refcount = 1;
                state
                    .remote_by_cluster
                    .entry(cluster.to_string())
                    .or_default()
                    .insert(numeric);
                state.by_labels.insert(identity.labels.clone(), numeric);
                if state.by_id.insert(numeric, identity.clone()).is_none() {
                    newly_live += 1;
                }
                merged_added.insert(numeric, identity);
            }
            for (numeric, _) in deleted {
                if let Some(identity) = state.by_id.remove(&numeric) {
                    state.by_labels.remove(&identity.labels);
                    if let Some(members) = state.remote_by_cluster.get_mut(cluster) {
                        members.remove(&numeric);
                    }
                    merged_deleted.insert(numeric, identity);
                }
            }
        }

        if merged_added.is_empty() && merged_deleted.is_empty() {
            return;
        }
        self.metrics.live_identities.add(newly_live as f64);
        self.metrics
            .live_identities
            .sub(merged_deleted.len() as f64);
        debug!(
            "Merged remote identity batch from {}: {} added, {} deleted",
            cluster,
            merged_added.len(),
            merged_deleted.len()
        );
        self.notify(&merged_added, &merged_deleted);
    }

    fn remove_remote_identities(&self, cluster: &str) {
        let _emit = self.emit.lock();

        let mut deleted = IdentityMap::new();
        {
            let mut state = self.state.lock();
            let Some(members) = state.remote_by_cluster.remove(cluster) else {
                return;
            };
            for numeric in members {
                if let Some(identity) = state.by_id.remove(&numeric) {
                    state.by_labels.remove(&identity.labels);
                    deleted.insert(numeric, identity);
                }
            }
        }

        if deleted.is_empty() {
            return;
        }
        self.metrics.live_identities.sub(deleted.len() as f64);
        info!(
            "Dropped {} identities learned from cluster {}",
            deleted.len(),
            cluster
        );
        self.notify(&IdentityMap::new(), &deleted);
    }
}
