//! Change propagation between the allocator and the policy subsystem.
//!
//! The allocator must not depend on the policy engine and the policy engine
//! must not depend on the allocator. `IdentityAllocatorOwner` sits between
//! them: it implements the narrow `AllocatorOwner` capability the allocator
//! is constructed with, and fans every change batch out to the registered
//! consumers. The selector cache is distinguished: it observes each batch
//! only after every other consumer has quiesced, and policy recomputation is
//! triggered only after the selector cache itself has acknowledged.

use std::net::IpAddr;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::IdentityError;
use crate::model::IdentityMap;
use crate::sync::{CompletionGuard, WaitGroup};

/// Reason string attached to identity-driven policy recomputation requests.
pub const POLICY_UPDATE_REASON: &str = "one or more identities created or deleted";

/// Consumer of identity change batches.
///
/// Implementations must signal `done` exactly once, even on internal
/// failure; dropping the guard counts. The call itself should not block:
/// long-running work belongs on the consumer's own executor, with the guard
/// carried along.
pub trait IdentityChangeHandler: Send + Sync {
    fn update_identities(&self, added: &IdentityMap, deleted: &IdentityMap, done: CompletionGuard);
}

/// Recomputation entry point implemented by the policy subsystem.
pub trait PolicyTrigger: Send + Sync {
    fn trigger_policy_updates(&self, force: bool, reason: &str);
}

/// The narrow capability the allocator depends on.
pub trait AllocatorOwner: Send + Sync {
    /// Propagates one change batch to all consumers. Blocks until the full
    /// two-phase fan-out and the recomputation trigger have completed.
    fn update_identities(&self, added: &IdentityMap, deleted: &IdentityMap);

    /// Suffix appended to cluster coordination keys written by this node.
    fn node_suffix(&self) -> Result<String, IdentityError>;
}

/// Mediator wiring the allocator to the policy subsystem.
pub struct IdentityAllocatorOwner {
    handlers: Vec<Arc<dyn IdentityChangeHandler>>,
    selector_cache: Arc<dyn IdentityChangeHandler>,
    policy_updater: Arc<dyn PolicyTrigger>,
    node_address: Option<IpAddr>,
}

impl IdentityAllocatorOwner {
    pub fn new(
        handlers: Vec<Arc<dyn IdentityChangeHandler>>,
        selector_cache: Arc<dyn IdentityChangeHandler>,
        policy_updater: Arc<dyn PolicyTrigger>,
        node_address: Option<IpAddr>,
    ) -> Self {
        Self {
            handlers,
            selector_cache,
            policy_updater,
            node_address,
        }
    }
}

impl AllocatorOwner for IdentityAllocatorOwner {
    fn update_identities(&self, added: &IdentityMap, deleted: &IdentityMap) {
        debug!(
            added = added.len(),
            deleted = deleted.len(),
            "Propagating identity change batch"
        );

        let failures = Arc::new(Mutex::new(Vec::new()));
        let wg = WaitGroup::new();

        thread::scope(|scope| {
            for handler in &self.handlers {
                let guard = CompletionGuard::new(&wg, &failures);
                let handler = Arc::clone(handler);
                scope.spawn(move || handler.update_identities(added, deleted, guard));
            }
            wg.wait();

            // The selector cache observes the batch strictly after every
            // other consumer has acknowledged it.
            let guard = CompletionGuard::new(&wg, &failures);
            self.selector_cache.update_identities(added, deleted, guard);
            wg.wait();
        });

        for failure in failures.lock().iter() {
            warn!("Identity change handler reported an error: {failure}");
        }

        self.policy_updater
            .trigger_policy_updates(false, POLICY_UPDATE_REASON);
    }

    fn node_suffix(&self) -> Result<String, IdentityError> {
        match self.node_address {
            Some(address) => Ok(address.to_string()),
            None => Err(IdentityError::NodeIdentityUnresolvable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, IdentityScope, LabelSet, NumericIdentity};
    use std::time::{Duration, Instant};

    struct RecordingHandler {
        name: &'static str,
        delay: Duration,
        log: Arc<Mutex<Vec<(&'static str, Instant)>>>,
        fail: bool,
    }

    impl IdentityChangeHandler for RecordingHandler {
        fn update_identities(
            &self,
            _added: &IdentityMap,
            _deleted: &IdentityMap,
            done: CompletionGuard,
        ) {
            thread::sleep(self.delay);
            self.log.lock().push((self.name, Instant::now()));
            if self.fail {
                done.fail(format!("{} failed internally", self.name));
            } else {
                done.complete();
            }
        }
    }

    #[derive(Default)]
    struct RecordingTrigger {
        calls: Mutex<Vec<(bool, String)>>,
    }

    impl PolicyTrigger for RecordingTrigger {
        fn trigger_policy_updates(&self, force: bool, reason: &str) {
            self.calls.lock().push((force, reason.to_string()));
        }
    }

    fn one_identity_batch() -> IdentityMap {
        let numeric = NumericIdentity(crate::model::LOCAL_SCOPE_FLAG | 1);
        let mut map = IdentityMap::new();
        map.insert(
            numeric,
            Identity {
                numeric,
                labels: LabelSet::new(["app=test"]),
                scope: IdentityScope::Local,
                refcount: 1,
            },
        );
        map
    }

    fn handler(
        name: &'static str,
        delay_ms: u64,
        log: &Arc<Mutex<Vec<(&'static str, Instant)>>>,
        fail: bool,
    ) -> Arc<dyn IdentityChangeHandler> {
        Arc::new(RecordingHandler {
            name,
            delay: Duration::from_millis(delay_ms),
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn selector_cache_observes_batch_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let trigger = Arc::new(RecordingTrigger::default());

        // One handler markedly slower than the other.
        let owner = IdentityAllocatorOwner::new(
            vec![
                handler("h1", 50, &log, false),
                handler("h2", 1, &log, false),
            ],
            handler("selector-cache", 0, &log, false),
            trigger.clone(),
            None,
        );

        owner.update_identities(&one_identity_batch(), &IdentityMap::new());

        let log = log.lock();
        assert_eq!(log.len(), 3);
        let (last_name, last_at) = log[2];
        assert_eq!(last_name, "selector-cache");
        for (name, at) in &log[..2] {
            assert!(
                *at <= last_at,
                "{name} completed after the selector cache"
            );
        }
    }

    #[test]
    fn trigger_fires_after_selector_cache_with_fixed_reason() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let trigger = Arc::new(RecordingTrigger::default());

        let owner = IdentityAllocatorOwner::new(
            vec![handler("h1", 5, &log, false)],
            handler("selector-cache", 5, &log, false),
            trigger.clone(),
            None,
        );

        owner.update_identities(&one_identity_batch(), &IdentityMap::new());

        let calls = trigger.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (false, POLICY_UPDATE_REASON.to_string()));
        // Both consumers acknowledged before the trigger fired.
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn failing_handler_does_not_abort_barrier() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let trigger = Arc::new(RecordingTrigger::default());

        let owner = IdentityAllocatorOwner::new(
            vec![
                handler("bad", 1, &log, true),
                handler("good", 10, &log, false),
            ],
            handler("selector-cache", 0, &log, false),
            trigger.clone(),
            None,
        );

        owner.update_identities(&one_identity_batch(), &IdentityMap::new());

        // All three consumers ran and recomputation was still requested.
        assert_eq!(log.lock().len(), 3);
        assert_eq!(trigger.calls.lock().len(), 1);
    }

    #[test]
    fn node_suffix_requires_an_address() {
        let trigger = Arc::new(RecordingTrigger::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let owner = IdentityAllocatorOwner::new(
            vec![],
            handler("selector-cache", 0, &log, false),
            trigger,
            Some("10.4.0.17".parse().unwrap()),
        );
        assert_eq!(owner.node_suffix().unwrap(), "10.4.0.17");

        let trigger = Arc::new(RecordingTrigger::default());
        let owner = IdentityAllocatorOwner::new(
            vec![],
            handler("selector-cache", 0, &log, false),
            trigger,
            None,
        );
        assert!(matches!(
            owner.node_suffix(),
            Err(IdentityError::NodeIdentityUnresolvable)
        ));
    }
}
