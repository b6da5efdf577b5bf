use std::{cell::RefCell, collections::HashMap, rc::Rc};

use tokio::sync::Notify;

/// Opaque identifier for a single reactive source (C5's `Dependency`, or a
/// `ReactiveValue`'s own identity). Allocated by [`DepRegistry::alloc`].
pub type DepId = u64;

/// The process-local hub that connects reactive sources to the effects that
/// read them.
///
/// A [`DepRegistry`] is the single place wakeups flow through: the watcher
/// pool and the cache layer call [`DepRegistry::invalidate`] when a path
/// changes, [`crate::value::ReactiveValue::set`] calls it when a derived
/// state changes, and [`crate::effect::run_effect`] calls
/// [`DepRegistry::register_waker`] for every dependency an effect's last run
/// touched.
///
/// Deliberately single-threaded (`Rc<RefCell<_>>`, no locks) per §5 of the
/// spec this implements ("single scheduling thread"); a kernel owns exactly
/// one `DepRegistry` on its dedicated thread.
#[derive(Default)]
pub struct DepRegistry {
    next_id: RefCell<DepId>,
    // one-shot waiters per dependency: cleared every time the dependency fires,
    // matching the "wake on any dep, rebuild every run" contract of C4.
    waiters: RefCell<HashMap<DepId, Vec<Rc<Notify>>>>,
    // bumped on every invalidate(dep), independent of whether a waiter is
    // currently registered. lets a still-running effect notice a dependency
    // fired while it had no waker registered yet (run_effect's dirty check),
    // per spec.md:94's "invalidations ... recorded as dirty" guarantee.
    generations: RefCell<HashMap<DepId, u64>>,
}

impl DepRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Allocate a fresh, never-reused dependency id.
    pub fn alloc(&self) -> DepId {
        let mut next = self.next_id.borrow_mut();
        let id = *next;
        *next += 1;
        id
    }

    /// Register interest in a dependency. The returned waiters are woken
    /// exactly once, the next time [`DepRegistry::invalidate`] is called for
    /// this id, then dropped from the registry (one-shot, per §4.1's "change"
    /// signal and §4.4's "dependency set is recomputed every run").
    pub fn register_waker(&self, dep: DepId, notify: Rc<Notify>) {
        self.waiters.borrow_mut().entry(dep).or_default().push(notify);
    }

    /// Fire all waiters registered for `dep` and drop them, and bump `dep`'s
    /// generation counter regardless of whether anyone was listening. A
    /// dependency with no registered waiters still needs the generation bump
    /// — an effect may be mid-run, having read `dep` already but not yet
    /// reached the point where it registers a waker for it.
    pub fn invalidate(&self, dep: DepId) {
        *self.generations.borrow_mut().entry(dep).or_insert(0) += 1;
        if let Some(waiters) = self.waiters.borrow_mut().remove(&dep) {
            for notify in waiters {
                notify.notify_one();
            }
        }
    }

    /// Current generation of `dep` — how many times it has ever been
    /// invalidated. Never invalidated reads as `0`.
    pub fn generation(&self, dep: DepId) -> u64 {
        *self.generations.borrow().get(&dep).unwrap_or(&0)
    }

    /// Snapshot of every dependency's current generation, taken before a run
    /// starts so the run can later tell whether any dependency it ends up
    /// reading was invalidated while it was in flight.
    pub fn generation_snapshot(&self) -> HashMap<DepId, u64> {
        self.generations.borrow().clone()
    }

    /// Test affordance: drop every pending waiter without firing them,
    /// simulating a fresh process. Never called from production code paths.
    pub fn clear(&self) {
        self.waiters.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_ids_are_unique_and_increasing() {
        let reg = DepRegistry::new();
        let a = reg.alloc();
        let b = reg.alloc();
        assert!(b > a);
    }

    #[tokio::test]
    async fn invalidate_wakes_registered_waiters_once() {
        let reg = DepRegistry::new();
        let dep = reg.alloc();
        let notify = Rc::new(Notify::new());
        reg.register_waker(dep, notify.clone());

        reg.invalidate(dep);
        // already-fired notification is observed without blocking
        notify.notified().await;
    }

    #[test]
    fn invalidate_with_no_waiters_is_a_no_op() {
        let reg = DepRegistry::new();
        let dep = reg.alloc();
        reg.invalidate(dep); // must not panic
    }

    #[test]
    fn invalidate_bumps_generation_even_with_no_waiters() {
        let reg = DepRegistry::new();
        let dep = reg.alloc();
        assert_eq!(reg.generation(dep), 0);
        reg.invalidate(dep);
        assert_eq!(reg.generation(dep), 1);
        reg.invalidate(dep);
        assert_eq!(reg.generation(dep), 2);
    }

    #[test]
    fn generation_snapshot_reflects_only_prior_invalidations() {
        let reg = DepRegistry::new();
        let dep = reg.alloc();
        reg.invalidate(dep);
        let snapshot = reg.generation_snapshot();
        assert_eq!(snapshot.get(&dep), Some(&1));
        reg.invalidate(dep);
        // the earlier snapshot is unaffected by later invalidations
        assert_eq!(snapshot.get(&dep), Some(&1));
        assert_eq!(reg.generation(dep), 2);
    }
}
