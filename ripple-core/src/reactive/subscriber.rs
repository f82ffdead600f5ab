//! Listener registry for change notifications.
//!
//! A [`Listeners`] channel keeps listeners in registration order. Emission
//! iterates a snapshot, so listeners may register or remove listeners while
//! being notified. A listener removed during an emission is not called later
//! in that same emission.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

type Listener<A> = Rc<dyn Fn(&A)>;

/// An ordered notification channel.
pub struct Listeners<A: ?Sized> {
    entries: RefCell<IndexMap<ListenerId, Listener<A>>>,
}

impl<A: ?Sized> Listeners<A> {
    /// An empty channel.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
        }
    }

    /// Register a listener at the end of the channel.
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&A) + 'static,
    {
        let id = ListenerId::new();
        self.entries.borrow_mut().insert(id, Rc::new(listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.entries.borrow_mut().shift_remove(&id).is_some()
    }

    /// Call every listener, in registration order.
    pub fn emit(&self, arg: &A) {
        let snapshot: SmallVec<[(ListenerId, Listener<A>); 4]> = self
            .entries
            .borrow()
            .iter()
            .map(|(id, listener)| (*id, Rc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            if self.entries.borrow().contains_key(&id) {
                listener(arg);
            }
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<A: ?Sized> Default for Listeners<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for Listeners<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

/// An explicit unsubscribe handle.
///
/// Dropping a subscription does **not** unsubscribe: listeners stay
/// registered until [`Subscription::unsubscribe`] is called, which consumes
/// the handle so teardown happens exactly once.
#[must_use = "dropping a Subscription leaves the listener registered"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// A subscription that runs `teardown` on unsubscribe.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// Remove the listener.
    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
