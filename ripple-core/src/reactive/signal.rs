//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a tracking context is active (a derived
//!    signal's computation or an effect run), the signal registers itself in
//!    that context.
//!
//! 2. Writes compare the new value with the current one using the signal's
//!    equality function. Equal writes are ignored.
//!
//! 3. Accepted writes notify listeners, either immediately or, inside a
//!    [`batch`](super::batch), once when the outermost batch flushes.
//!
//! # Mutable and Derived Signals
//!
//! Both kinds share one core. [`MutableSignal<T>`] adds the write side and
//! dereferences to the read-only [`Signal<T>`]. Derived signals (see
//! [`computed`](super::computed)) additionally carry a compute function,
//! a dirty flag and their current dependency set.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A unique ID (8 bytes)
//! - The cached outcome (a value, or for derived signals a failure or a
//!   suspension)
//! - The equality function and notification channel
//! - For derived signals, the derivation state

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use super::batch::BatchQueue;
use super::context::Tracker;
use super::memo::{ComputeFn, Derivation, MemoState};
use super::runtime::Runtime;
use super::subscriber::{ListenerId, Listeners, Subscription};
use crate::error::{Error, Interrupt, Outcome};

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    /// Generate a new unique signal ID.
    fn next() -> Self {
        Self(SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Per-signal configuration.
///
/// The default equality is `PartialEq`. Types without a meaningful equality
/// can use [`SignalOptions::with_equals`] or [`SignalOptions::always_notify`].
pub struct SignalOptions<T> {
    pub(crate) equals: Equality<T>,
    pub(crate) name: Option<Rc<str>>,
}

impl<T: PartialEq + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::with_equals(|a: &T, b: &T| a == b)
    }
}

impl<T: 'static> SignalOptions<T> {
    /// Options using `equals` to decide whether a write changes the value.
    pub fn with_equals<F>(equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            equals: Rc::new(equals),
            name: None,
        }
    }

    /// Options under which every write notifies.
    pub fn always_notify() -> Self {
        Self::with_equals(|_, _| false)
    }

    /// Replace the equality function.
    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.equals = Rc::new(equals);
        self
    }

    /// Attach a name, reported in log fields.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Rc::from(name.into()));
        self
    }
}

impl<T> fmt::Debug for SignalOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalOptions").field("name", &self.name).finish()
    }
}

/// Something a computation can depend on.
pub(crate) trait Source {
    /// Call `on_change` whenever the source's outcome changes.
    fn subscribe_changes(&self, on_change: Rc<dyn Fn()>) -> Subscription;
}

/// Shared state behind every [`Signal`] handle.
pub(crate) struct SignalCore<T> {
    pub(crate) id: SignalId,
    pub(crate) name: Option<Rc<str>>,
    pub(crate) this: Weak<SignalCore<T>>,
    /// `None` only before a derived signal's first computation.
    pub(crate) value: RefCell<Option<Outcome<T>>>,
    pub(crate) equals: Equality<T>,
    pub(crate) listeners: Listeners<Outcome<T>>,
    pub(crate) derivation: Option<Derivation<T>>,
}

impl<T: Clone + 'static> SignalCore<T> {
    fn new_mutable(value: T, options: SignalOptions<T>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: SignalId::next(),
            name: options.name,
            this: this.clone(),
            value: RefCell::new(Some(Ok(value))),
            equals: options.equals,
            listeners: Listeners::new(),
            derivation: None,
        })
    }

    /// Build a derived core. `build` receives a weak handle to the core so
    /// the compute function can refer back to its own signal.
    pub(crate) fn new_derived<F>(options: SignalOptions<T>, build: F) -> Rc<Self>
    where
        F: FnOnce(&Weak<Self>) -> ComputeFn<T>,
    {
        Rc::new_cyclic(|this| Self {
            id: SignalId::next(),
            name: options.name,
            this: this.clone(),
            value: RefCell::new(None),
            equals: options.equals,
            listeners: Listeners::new(),
            derivation: Some(Derivation::new(build(this))),
        })
    }

    /// Read the current outcome, recomputing a dirty derived signal first.
    pub(crate) fn try_get(&self, tracked: bool) -> Outcome<T> {
        if let Some(derivation) = &self.derivation {
            if derivation.is_computing() {
                return Err(Error::Cycle(self.id).into());
            }
        }
        if tracked {
            self.track();
        }

        if let Some(derivation) = &self.derivation {
            if derivation.is_dirty() {
                return self.recompute(derivation);
            }
        }
        let cached = self.value.borrow().clone();
        match (cached, &self.derivation) {
            (Some(outcome), _) => outcome,
            (None, Some(derivation)) => self.recompute(derivation),
            (None, None) => unreachable!("mutable signals are created with a value"),
        }
    }

    fn track(&self) {
        if let Some(tracker) = Tracker::current() {
            tracker.record(self.id, || self.source());
        }
    }

    pub(crate) fn source(&self) -> Option<Rc<dyn Source>> {
        self.this.upgrade().map(|core| core as Rc<dyn Source>)
    }

    /// Make sure a derived signal holds an up-to-date value so that a new
    /// observer starts from a subscribed, clean state.
    fn ensure_current(&self) {
        if let Some(derivation) = &self.derivation {
            let never_computed = self.value.borrow().is_none();
            if (never_computed || derivation.is_dirty()) && !derivation.is_computing() {
                let _ = self.try_get(false);
            }
        }
    }

    pub(crate) fn same(&self, a: &Outcome<T>, b: &Outcome<T>) -> bool {
        match (a, b) {
            (Ok(a), Ok(b)) => (self.equals)(a, b),
            (Err(a), Err(b)) => a.same_as(b),
            _ => false,
        }
    }

    /// Store `next`, returning whether observers must be told.
    pub(crate) fn store(&self, next: Outcome<T>) -> bool {
        let previous = self.value.replace(Some(next));
        match (&previous, &*self.value.borrow()) {
            (Some(previous), Some(next)) => !self.same(previous, next),
            _ => false,
        }
    }

    /// Deliver `value` to listeners, through the active batch if there is one.
    pub(crate) fn notify(&self, value: Outcome<T>) {
        let this = self.this.clone();
        let deliver = move || {
            if let Some(core) = this.upgrade() {
                core.listeners.emit(&value);
            }
        };

        match BatchQueue::current() {
            Some(queue) => queue.enqueue(self.id, Box::new(deliver)),
            None => Runtime::propagate(deliver),
        }
    }

    fn write(&self, value: T) {
        let unchanged = matches!(
            &*self.value.borrow(),
            Some(Ok(current)) if (self.equals)(current, &value)
        );
        if unchanged {
            trace!(signal = %self.id, name = self.name.as_deref(), "write ignored, value unchanged");
            return;
        }

        self.value.replace(Some(Ok(value.clone())));
        trace!(signal = %self.id, name = self.name.as_deref(), "signal written");
        self.notify(Ok(value));
    }

    fn unsubscriber(&self, id: ListenerId) -> Subscription {
        let this = self.this.clone();
        Subscription::new(move || {
            if let Some(core) = this.upgrade() {
                core.listeners.remove(id);
            }
        })
    }
}

impl<T: Clone + 'static> Source for SignalCore<T> {
    fn subscribe_changes(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.ensure_current();
        let id = self.listeners.add(move |_| on_change());
        self.unsubscriber(id)
    }
}

impl<T> Drop for SignalCore<T> {
    fn drop(&mut self) {
        if let Some(derivation) = &self.derivation {
            derivation.release();
        }
    }
}

fn expect_ready<T>(id: SignalId, outcome: Outcome<T>) -> T {
    match outcome {
        Ok(value) => value,
        Err(Interrupt::Pending(suspension)) => panic!(
            "signal {id} is suspended on {}; use try_read to observe suspension",
            suspension.id()
        ),
        Err(Interrupt::Failed(error)) => {
            panic!("signal {id} failed: {error}; use try_read to observe failures")
        }
    }
}

// ----------------------------------------------------------------------------
// Public handles
// ----------------------------------------------------------------------------

/// A read-only handle to a mutable or derived signal.
///
/// Cloning is cheap and all clones share the same signal.
pub struct Signal<T> {
    pub(crate) core: Rc<SignalCore<T>>,
}

impl<T> Signal<T> {
    pub(crate) fn from_core(core: Rc<SignalCore<T>>) -> Self {
        Self { core }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SignalId {
        self.core.id
    }

    /// The name given in [`SignalOptions`], if any.
    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }

    /// Number of listeners, including dependent computations.
    pub fn subscriber_count(&self) -> usize {
        self.core.listeners.len()
    }

    /// Whether this signal is computed from other signals.
    pub fn is_derived(&self) -> bool {
        self.core.derivation.is_some()
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value, registering a dependency in the active
    /// tracking context.
    ///
    /// # Panics
    ///
    /// Panics if a derived signal's computation failed or is suspended. Use
    /// [`Signal::try_read`] where that can happen.
    pub fn read(&self) -> T {
        expect_ready(self.core.id, self.try_read())
    }

    /// Get the current outcome, registering a dependency in the active
    /// tracking context.
    pub fn try_read(&self) -> Outcome<T> {
        self.core.try_get(true)
    }

    /// Get the current value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Signal::read`].
    pub fn peek(&self) -> T {
        expect_ready(self.core.id, self.try_peek())
    }

    /// Get the current outcome without registering a dependency.
    pub fn try_peek(&self) -> Outcome<T> {
        self.core.try_get(false)
    }

    /// Call `listener` with the new value after every accepted change.
    ///
    /// The listener stays registered until the returned subscription is
    /// unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        self.core.ensure_current();
        let id = self.core.listeners.add(move |outcome: &Outcome<T>| {
            if let Ok(value) = outcome {
                listener(value);
            }
        });
        self.core.unsubscriber(id)
    }

    /// Number of signals read by the last computation (0 for mutable signals).
    pub fn dependency_count(&self) -> usize {
        self.core
            .derivation
            .as_ref()
            .map_or(0, Derivation::dependency_count)
    }

    /// Dirty state of a derived signal, `None` for mutable signals.
    pub fn memo_state(&self) -> Option<MemoState> {
        self.core.derivation.as_ref().map(Derivation::state)
    }

    /// How many times the compute function has run (0 for mutable signals).
    pub fn compute_count(&self) -> usize {
        self.core
            .derivation
            .as_ref()
            .map_or(0, Derivation::compute_count)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl<T> Eq for Signal<T> {}

impl<T> Hash for Signal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("value", &*self.core.value.borrow())
            .field("subscriber_count", &self.core.listeners.len())
            .finish()
    }
}

/// A signal that can be written.
///
/// Dereferences to [`Signal<T>`] for the read side.
///
/// # Example
///
/// ```rust,ignore
/// let count = signal(0);
///
/// // Read the value
/// let value = count.read();
///
/// // Update the value (notifies subscribers)
/// count.write(5);
/// count.update(|n| n + 1);
/// ```
pub struct MutableSignal<T> {
    signal: Signal<T>,
}

impl<T: Clone + 'static> MutableSignal<T> {
    /// Replace the value and notify if it changed.
    pub fn write(&self, value: T) {
        self.signal.core.write(value);
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.signal.peek());
        self.write(next);
    }

    /// Mutate a draft copy of the value and commit it as the next value.
    ///
    /// The stored value is never edited in place; readers holding the
    /// previous value keep seeing it unchanged.
    pub fn produce<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let mut draft = self.signal.peek();
        f(&mut draft);
        self.write(draft);
    }

    /// A read-only handle to the same signal.
    pub fn read_only(&self) -> Signal<T> {
        self.signal.clone()
    }
}

impl<T> Deref for MutableSignal<T> {
    type Target = Signal<T>;

    fn deref(&self) -> &Signal<T> {
        &self.signal
    }
}

impl<T> Clone for MutableSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.signal.fmt(f)
    }
}

impl<T: Clone + 'static> From<MutableSignal<T>> for Signal<T> {
    fn from(signal: MutableSignal<T>) -> Self {
        signal.signal
    }
}

/// Create a mutable signal compared with `PartialEq`.
pub fn signal<T>(value: T) -> MutableSignal<T>
where
    T: Clone + PartialEq + 'static,
{
    signal_with(value, SignalOptions::default())
}

/// Create a mutable signal with explicit options.
pub fn signal_with<T>(value: T, options: SignalOptions<T>) -> MutableSignal<T>
where
    T: Clone + 'static,
{
    MutableSignal {
        signal: Signal::from_core(SignalCore::new_mutable(value, options)),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
