//! Derived Signals
//!
//! A derived signal caches the outcome of a compute function and recomputes
//! it only when one of the signals it read has changed.
//!
//! # How Derived Signals Work
//!
//! 1. On first access, the compute function runs inside a fresh tracking
//!    scope. Every signal it reads is recorded as a dependency and the
//!    outcome is cached.
//!
//! 2. When a dependency notifies, the derived signal is marked dirty and a
//!    refresh is queued on the [`Runtime`](super::Runtime).
//!
//! 3. The refresh recomputes right away if somebody observes the signal.
//!    Otherwise the signal stays dirty and the next read recomputes it.
//!
//! 4. After each recompute the new dependency set is diffed against the old
//!    one: dropped dependencies are unsubscribed, new ones subscribed.
//!
//! 5. Listeners are notified only if the outcome actually changed.
//!
//! # Failures and Suspension
//!
//! The cached value is an [`Outcome`]. A failed computation is cached like a
//! value until a dependency changes. A suspended computation is retried once
//! the suspension settles.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use super::context::{Tracker, TRACKER};
use super::effect::LateTracking;
use super::runtime::{JobKey, Runtime};
use super::signal::{Signal, SignalCore, SignalId, SignalOptions, Source};
use super::subscriber::Subscription;
use crate::error::{Interrupt, Outcome};

/// Dirty state for a derived signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last computation.
    Dirty,

    /// The compute function is running.
    Computing,
}

pub(crate) type ComputeFn<T> = Box<dyn Fn() -> Outcome<T>>;

/// The derived half of a [`SignalCore`].
pub(crate) struct Derivation<T> {
    compute: ComputeFn<T>,
    state: Cell<MemoState>,
    /// A dependency changed while the compute function was running.
    stale: Cell<bool>,
    generation: Cell<u64>,
    dependencies: RefCell<IndexMap<SignalId, Subscription>>,
    compute_count: Cell<usize>,
}

impl<T> Derivation<T> {
    pub(crate) fn new(compute: ComputeFn<T>) -> Self {
        Self {
            compute,
            state: Cell::new(MemoState::Dirty),
            stale: Cell::new(false),
            generation: Cell::new(0),
            dependencies: RefCell::new(IndexMap::new()),
            compute_count: Cell::new(0),
        }
    }

    pub(crate) fn state(&self) -> MemoState {
        self.state.get()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.state.get() == MemoState::Dirty
    }

    pub(crate) fn is_computing(&self) -> bool {
        self.state.get() == MemoState::Computing
    }

    /// Identifies the most recent computation.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }

    pub(crate) fn compute_count(&self) -> usize {
        self.compute_count.get()
    }

    /// Unsubscribe from every dependency.
    pub(crate) fn release(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.borrow_mut());
        for (_, subscription) in dependencies {
            subscription.unsubscribe();
        }
    }
}

/// Resets the state if the compute function panics.
struct ComputingGuard<'a> {
    state: &'a Cell<MemoState>,
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        if self.state.get() == MemoState::Computing {
            self.state.set(MemoState::Dirty);
        }
    }
}

impl<T: Clone + 'static> SignalCore<T> {
    fn derivation(&self) -> Option<&Derivation<T>> {
        self.derivation.as_ref()
    }

    /// Run the compute function, rebuild the dependency set and cache the
    /// outcome.
    pub(crate) fn recompute(&self, derivation: &Derivation<T>) -> Outcome<T> {
        Runtime::propagate(|| {
            let guard = ComputingGuard {
                state: &derivation.state,
            };
            derivation.state.set(MemoState::Computing);
            derivation.stale.set(false);
            derivation.generation.set(derivation.generation.get() + 1);
            derivation.compute_count.set(derivation.compute_count.get() + 1);
            let generation = derivation.generation.get();

            let tracker = Tracker::new();
            let outcome = TRACKER.scope(tracker.clone(), || (derivation.compute)());
            self.update_dependencies(derivation, tracker);

            if let Err(Interrupt::Pending(suspension)) = &outcome {
                let this = self.this.clone();
                suspension.on_settle(move |_| {
                    let Some(core) = this.upgrade() else {
                        return;
                    };
                    if core.derivation().map(Derivation::generation) == Some(generation) {
                        trace!(signal = %core.id, "suspension settled, retrying computation");
                        core.invalidate();
                    }
                });
            }

            if derivation.stale.replace(false) {
                derivation.state.set(MemoState::Dirty);
                self.schedule_refresh();
            } else {
                derivation.state.set(MemoState::Clean);
            }
            drop(guard);

            trace!(
                signal = %self.id,
                name = self.name.as_deref(),
                dependencies = derivation.dependency_count(),
                ok = outcome.is_ok(),
                "derived signal recomputed"
            );

            if self.store(outcome.clone()) {
                self.notify(outcome.clone());
            }
            outcome
        })
    }

    fn update_dependencies(&self, derivation: &Derivation<T>, tracker: Tracker) {
        let mut next = tracker.take();

        let removed: Vec<Subscription> = {
            let mut current = derivation.dependencies.borrow_mut();
            let gone: Vec<SignalId> = current
                .keys()
                .filter(|id| !next.contains_key(*id))
                .copied()
                .collect();
            gone.iter()
                .filter_map(|id| current.shift_remove(id))
                .collect()
        };
        let removed_count = removed.len();
        for subscription in removed {
            subscription.unsubscribe();
        }

        next.retain(|id, _| !derivation.dependencies.borrow().contains_key(id));
        let added_count = next.len();
        for (id, source) in next {
            let subscription = source.subscribe_changes(self.on_change());
            derivation.dependencies.borrow_mut().insert(id, subscription);
        }

        if removed_count > 0 || added_count > 0 {
            trace!(
                signal = %self.id,
                added = added_count,
                removed = removed_count,
                "dependency set changed"
            );
        }
    }

    fn on_change(&self) -> Rc<dyn Fn()> {
        let this = self.this.clone();
        Rc::new(move || {
            if let Some(core) = this.upgrade() {
                core.invalidate();
            }
        })
    }

    /// Mark the signal dirty after a dependency changed.
    pub(crate) fn invalidate(&self) {
        let Some(derivation) = self.derivation() else {
            return;
        };
        match derivation.state.get() {
            MemoState::Computing => derivation.stale.set(true),
            MemoState::Dirty => {}
            MemoState::Clean => {
                derivation.state.set(MemoState::Dirty);
                self.schedule_refresh();
            }
        }
    }

    fn schedule_refresh(&self) {
        let this = self.this.clone();
        Runtime::schedule(JobKey::Signal(self.id), move || {
            if let Some(core) = this.upgrade() {
                core.refresh();
            }
        });
    }

    /// Recompute a dirty signal that somebody is listening to.
    fn refresh(&self) {
        let observed = !self.listeners.is_empty();
        if let Some(derivation) = self.derivation() {
            if derivation.is_dirty() && observed {
                // Failures are cached and delivered to listeners.
                let _ = self.recompute(derivation);
            }
        }
    }

    /// Replace the cached outcome without recomputing.
    ///
    /// Used by async signals when a returned operation settles.
    pub(crate) fn overwrite(&self, outcome: Outcome<T>) {
        if self.derivation().is_some_and(Derivation::is_computing) {
            return;
        }
        if self.store(outcome.clone()) {
            self.notify(outcome);
        }
    }
}

impl<T: Clone + 'static> LateTracking for SignalCore<T> {
    fn track_late(&self, generation: u64, id: SignalId, source: Rc<dyn Source>) {
        let Some(derivation) = self.derivation() else {
            return;
        };
        if derivation.generation() != generation || derivation.dependencies.borrow().contains_key(&id) {
            return;
        }
        let subscription = source.subscribe_changes(self.on_change());
        derivation.dependencies.borrow_mut().insert(id, subscription);
        trace!(signal = %self.id, dependency = %id, "late dependency registered");
    }
}

// ----------------------------------------------------------------------------
// Constructors
// ----------------------------------------------------------------------------

/// Create a derived signal from an infallible computation.
///
/// The computation is not run immediately. It runs on first access.
///
/// # Example
///
/// ```rust,ignore
/// let count = signal(2);
/// let doubled = computed({
///     let count = count.clone();
///     move || count.read() * 2
/// });
/// assert_eq!(doubled.read(), 4);
/// ```
pub fn computed<T, F>(compute: F) -> Signal<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    computed_with(compute, SignalOptions::default())
}

/// [`computed`] with explicit options, such as a custom equality.
pub fn computed_with<T, F>(compute: F, options: SignalOptions<T>) -> Signal<T>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    try_computed_with(move || Ok(compute()), options)
}

/// Create a derived signal whose computation may fail or suspend.
pub fn try_computed<T, F>(compute: F) -> Signal<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> Outcome<T> + 'static,
{
    try_computed_with(compute, SignalOptions::default())
}

/// [`try_computed`] with explicit options.
pub fn try_computed_with<T, F>(compute: F, options: SignalOptions<T>) -> Signal<T>
where
    T: Clone + 'static,
    F: Fn() -> Outcome<T> + 'static,
{
    Signal::from_core(SignalCore::new_derived(options, move |_| {
        Box::new(compute) as ComputeFn<T>
    }))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactive::signal::signal;
    use crate::suspense::Pending;

    #[test]
    fn computes_lazily_and_caches() {
        let source = signal(10);
        let doubled = computed({
            let source = source.clone();
            move || source.read() * 2
        });

        assert_eq!(doubled.compute_count(), 0);
        assert_eq!(doubled.read(), 20);
        assert_eq!(doubled.read(), 20);
        assert_eq!(doubled.compute_count(), 1);
        assert_eq!(doubled.dependency_count(), 1);
    }

    #[test]
    fn recomputes_after_dependency_change() {
        let source = signal(1);
        let plus_one = computed({
            let source = source.clone();
            move || source.read() + 1
        });
        assert_eq!(plus_one.read(), 2);

        source.write(5);
        assert_eq!(plus_one.read(), 6);
        assert_eq!(plus_one.compute_count(), 2);
    }

    #[test]
    fn unobserved_signal_stays_lazy() {
        let source = signal(1);
        let derived = computed({
            let source = source.clone();
            move || source.read()
        });
        let _ = derived.read();

        source.write(2);
        source.write(3);
        assert_eq!(derived.compute_count(), 1);
        assert_eq!(derived.read(), 3);
        assert_eq!(derived.compute_count(), 2);
    }

    #[test]
    fn observed_signal_refreshes_eagerly() {
        let source = signal(1);
        let derived = computed({
            let source = source.clone();
            move || source.read() * 10
        });
        let seen = Rc::new(Cell::new(0));
        let sink = Rc::clone(&seen);
        let _subscription = derived.subscribe(move |value| sink.set(*value));

        source.write(4);
        assert_eq!(seen.get(), 40);
    }

    #[test]
    fn dependency_set_follows_branches() {
        let flag = signal(true);
        let left = signal(1);
        let right = signal(2);
        let pick = computed({
            let (flag, left, right) = (flag.clone(), left.clone(), right.clone());
            move || if flag.read() { left.read() } else { right.read() }
        });

        assert_eq!(pick.read(), 1);
        assert_eq!(left.subscriber_count(), 1);
        assert_eq!(right.subscriber_count(), 0);

        flag.write(false);
        assert_eq!(pick.read(), 2);
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);
        assert_eq!(pick.dependency_count(), 2);
    }

    #[test]
    fn equal_results_do_not_notify() {
        let source = signal(3);
        let parity = computed({
            let source = source.clone();
            move || source.read() % 2
        });
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let _subscription = parity.subscribe(move |_| counter.set(counter.get() + 1));

        source.write(5);
        assert_eq!(parity.compute_count(), 2);
        assert_eq!(calls.get(), 0);

        source.write(6);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failures_are_cached_until_inputs_change() {
        let input = signal(-1);
        let checked = try_computed({
            let input = input.clone();
            move || {
                let value = input.read();
                if value < 0 {
                    return Err(Error::msg("negative").into());
                }
                Ok(value)
            }
        });

        assert!(checked.try_read().is_err());
        assert!(checked.try_read().is_err());
        assert_eq!(checked.compute_count(), 1);

        input.write(4);
        assert_eq!(checked.try_read().ok(), Some(4));
    }

    #[test]
    #[should_panic(expected = "failed")]
    fn read_panics_on_failure() {
        let broken = try_computed::<i32, _>(|| Err(Error::msg("broken").into()));
        broken.read();
    }

    #[test]
    fn reading_itself_is_a_cycle() {
        let slot: Rc<RefCell<Option<Signal<i32>>>> = Rc::new(RefCell::new(None));
        let inner = Rc::clone(&slot);
        let looped = try_computed(move || {
            let me = inner.borrow().clone();
            match me {
                Some(me) => me.try_read().map(|v| v + 1),
                None => Ok(0),
            }
        });
        *slot.borrow_mut() = Some(looped.clone());

        let error = looped.try_read().unwrap_err();
        assert!(matches!(error.error(), Some(Error::Cycle(id)) if *id == looped.id()));
    }

    #[test]
    fn suspended_computation_retries_on_settlement() {
        let (pending, resolver) = Pending::<i32>::new();
        let derived = try_computed({
            let pending = pending.clone();
            move || match pending.result() {
                Some(result) => Ok(result? * 2),
                None => Err(pending.suspension().into()),
            }
        });

        let first = derived.try_read().unwrap_err();
        assert!(first.is_pending());
        assert_eq!(derived.compute_count(), 1);

        resolver.resolve(21);
        assert_eq!(derived.try_read().ok(), Some(42));
        assert_eq!(derived.compute_count(), 2);
    }

    #[test]
    fn dropping_a_derived_signal_unsubscribes() {
        let source = signal(0);
        let derived = computed({
            let source = source.clone();
            move || source.read()
        });
        let _ = derived.read();
        assert_eq!(source.subscriber_count(), 1);

        drop(derived);
        assert_eq!(source.subscriber_count(), 0);
    }
}
