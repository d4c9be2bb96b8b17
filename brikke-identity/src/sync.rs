//! Completion barrier primitives for change fan-out.
//!
//! The propagation protocol launches one task per registered consumer and
//! must not proceed until every task has signalled completion. `WaitGroup`
//! is the countdown latch; `CompletionGuard` is the single-use signal handed
//! to each consumer. A guard that is dropped without an explicit call still
//! counts down, so a panicking consumer cannot wedge the barrier.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: Mutex<usize>,
    cond: Condvar,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        *self.inner.count.lock() += n;
    }

    fn done(&self) {
        let mut count = self.inner.count.lock();
        *count -= 1;
        if *count == 0 {
            self.inner.cond.notify_all();
        }
    }

    /// Blocks until the count reaches zero. No timeout: a consumer that never
    /// signals stalls the caller indefinitely.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count > 0 {
            self.inner.cond.wait(&mut count);
        }
    }
}

/// Single-use completion signal for one consumer of a change batch.
pub struct CompletionGuard {
    wg: WaitGroup,
    failures: Arc<Mutex<Vec<String>>>,
    signalled: bool,
}

impl CompletionGuard {
    pub(crate) fn new(wg: &WaitGroup, failures: &Arc<Mutex<Vec<String>>>) -> Self {
        wg.add(1);
        Self {
            wg: wg.clone(),
            failures: Arc::clone(failures),
            signalled: false,
        }
    }

    /// Signals successful completion.
    pub fn complete(mut self) {
        self.signal();
    }

    /// Signals completion while recording an internal failure. The failure is
    /// surfaced by the dispatcher after the barrier; it does not abort it.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.failures.lock().push(reason.into());
        self.signal();
    }

    fn signal(&mut self) {
        if !self.signalled {
            self.signalled = true;
            self.wg.done();
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_all_signal() {
        let wg = WaitGroup::new();
        let failures = Arc::new(Mutex::new(Vec::new()));

        let guards: Vec<_> = (0..4).map(|_| CompletionGuard::new(&wg, &failures)).collect();
        let handles: Vec<_> = guards
            .into_iter()
            .map(|guard| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    guard.complete();
                })
            })
            .collect();

        wg.wait();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn dropped_guard_counts_down() {
        let wg = WaitGroup::new();
        let failures = Arc::new(Mutex::new(Vec::new()));
        {
            let _guard = CompletionGuard::new(&wg, &failures);
            // dropped without an explicit call
        }
        wg.wait();
    }

    #[test]
    fn failure_is_recorded_not_fatal() {
        let wg = WaitGroup::new();
        let failures = Arc::new(Mutex::new(Vec::new()));
        CompletionGuard::new(&wg, &failures).fail("consumer choked");
        wg.wait();
        assert_eq!(failures.lock().as_slice(), ["consumer choked"]);
    }

    #[test]
    fn complete_signals_only_once() {
        let wg = WaitGroup::new();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let guard = CompletionGuard::new(&wg, &failures);
        wg.add(1);
        guard.complete();
        // one count remains: the explicit add above
        assert_eq!(*wg.inner.count.lock(), 1);
        wg.done();
    }
}
