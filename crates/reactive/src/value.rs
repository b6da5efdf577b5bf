use std::{cell::RefCell, rc::Rc};

use crate::{
    context::Context,
    registry::{DepId, DepRegistry},
};

type Listener<T> = Rc<dyn Fn(&T)>;

struct Inner<T> {
    state: RefCell<T>,
    equals: Box<dyn Fn(&T, &T) -> bool>,
    listeners: RefCell<Vec<(u64, Listener<T>)>>,
    next_listener_id: RefCell<u64>,
}

/// C3: an immutable handle owning a single mutable slot plus a set of
/// listener callbacks, with a configurable equality predicate.
///
/// Also doubles as a [`crate::registry::DepId`]-bearing dependency source so
/// derived [`crate::effect::run_effect`] tasks can read one `ReactiveValue`
/// (e.g. a per-change `status`) from within another's task
/// (e.g. `statusList`) and be woken when it changes.
pub struct ReactiveValue<T> {
    dep_id: DepId,
    registry: Rc<DepRegistry>,
    inner: Inner<T>,
}

impl<T: Clone + 'static> ReactiveValue<T> {
    pub fn new(registry: Rc<DepRegistry>, initial: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(registry, initial, |a, b| a == b)
    }

    pub fn with_equals(
        registry: Rc<DepRegistry>,
        initial: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let dep_id = registry.alloc();
        Self {
            dep_id,
            registry,
            inner: Inner {
                state: RefCell::new(initial),
                equals: Box::new(equals),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: RefCell::new(0),
            },
        }
    }

    pub fn dep_id(&self) -> DepId {
        self.dep_id
    }

    /// Returns the current value. No side effect — does not enlist this
    /// value as a dependency of the ambient context.
    pub fn get(&self) -> T {
        self.inner.state.borrow().clone()
    }

    /// Like [`ReactiveValue::get`], but also records this value's dep id
    /// against the ambient [`Context`], if any.
    pub fn get_tracked(&self) -> T {
        Context::record(self.dep_id);
        self.get()
    }

    /// Compare with the configured equality predicate; if distinct, store
    /// and notify listeners in registration order, then invalidate this
    /// value's dependents. Notifications complete synchronously before
    /// `set` returns (C3's invariant). Listeners registered during this call
    /// do not observe the in-flight event.
    pub fn set(&self, v: T) {
        let changed = !(self.inner.equals)(&self.inner.state.borrow(), &v);
        if !changed {
            return;
        }
        *self.inner.state.borrow_mut() = v.clone();

        let snapshot: Vec<Listener<T>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            listener(&v);
        }

        self.registry.invalidate(self.dep_id);
    }

    /// Subscribe to future changes. Returns an id usable with
    /// [`ReactiveValue::unsubscribe`].
    pub fn on_change(&self, cb: impl Fn(&T) + 'static) -> u64 {
        let id = {
            let mut next = self.inner.next_listener_id.borrow_mut();
            let id = *next;
            *next += 1;
            id
        };
        self.inner.listeners.borrow_mut().push((id, Rc::new(cb)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.listeners.borrow_mut().retain(|(i, _)| *i != id);
    }
}
