//! Async Signals
//!
//! An async signal is a derived `Signal<Loadable<T>>` whose computation may
//! hand back an operation instead of a value. Reading it never blocks: an
//! unfinished operation shows up as [`Loadable::Loading`] and the signal
//! updates itself when the operation settles.
//!
//! # Computation Tokens
//!
//! Every computation mints a fresh [`ComputationToken`] and cancels the
//! previous run's [`Cancellation`]. Settlements are applied only while their
//! token is still current, so a superseded run can never overwrite the
//! result of a newer one.
//!
//! # Returned vs. Suspended Operations
//!
//! - A returned operation ([`AsyncValue::Pending`]) *is* the result. When it
//!   settles, the cached value is overwritten directly without running the
//!   computation again.
//! - A suspension ([`Interrupt::Pending`]) means "retry later". When it
//!   settles, the whole computation runs again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::error::{Error, Interrupt, Outcome};
use crate::reactive::{ComputeFn, LateTracking, Signal, SignalCore, SignalOptions, Track, Tracker};
use crate::suspense::{Cancellation, Loadable, Pending};

/// Identity of one async computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputationToken(u64);

impl ComputationToken {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ComputationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// What an async signal's computation produces.
#[derive(Debug, Clone)]
pub enum AsyncValue<T> {
    /// The value is available now.
    Ready(T),
    /// The value arrives when this operation settles.
    Pending(Pending<T>),
}

impl<T> From<Pending<T>> for AsyncValue<T> {
    fn from(pending: Pending<T>) -> Self {
        Self::Pending(pending)
    }
}

/// What an async signal's computation receives.
#[derive(Debug, Clone)]
pub struct AsyncContext {
    /// Explicit tracking for reads made after an `.await`.
    pub track: Track,
    /// Cancelled when the computation is superseded.
    pub cancellation: Cancellation,
    pub token: ComputationToken,
}

struct AsyncState {
    token: Cell<Option<ComputationToken>>,
    cancellation: RefCell<Cancellation>,
}

impl AsyncState {
    fn is_current(&self, token: ComputationToken) -> bool {
        self.token.get() == Some(token)
    }
}

/// Create an async signal.
///
/// # Example
///
/// ```rust,ignore
/// let user_id = signal(1);
/// let user = async_signal({
///     let user_id = user_id.clone();
///     move |ctx| {
///         let id = user_id.read();
///         let cancellation = ctx.cancellation.clone();
///         Ok(Pending::spawn(async move { fetch_user(id, cancellation).await }).into())
///     }
/// });
///
/// assert!(user.read().is_loading());
/// ```
pub fn async_signal<T, F>(compute: F) -> Signal<Loadable<T>>
where
    T: Clone + PartialEq + 'static,
    F: Fn(&AsyncContext) -> Outcome<AsyncValue<T>> + 'static,
{
    async_signal_with(compute, SignalOptions::default())
}

/// Create an async signal with explicit options.
pub fn async_signal_with<T, F>(compute: F, options: SignalOptions<Loadable<T>>) -> Signal<Loadable<T>>
where
    T: Clone + 'static,
    F: Fn(&AsyncContext) -> Outcome<AsyncValue<T>> + 'static,
{
    let state = Rc::new(AsyncState {
        token: Cell::new(None),
        cancellation: RefCell::new(Cancellation::new()),
    });

    let core = SignalCore::new_derived(options, move |this| {
        let this = this.clone();
        Box::new(move || Ok(run_computation(&this, &state, &compute))) as ComputeFn<Loadable<T>>
    });
    Signal::from_core(core)
}

fn run_computation<T, F>(
    this: &Weak<SignalCore<Loadable<T>>>,
    state: &Rc<AsyncState>,
    compute: &F,
) -> Loadable<T>
where
    T: Clone + 'static,
    F: Fn(&AsyncContext) -> Outcome<AsyncValue<T>>,
{
    let token = ComputationToken::next();
    state.token.set(Some(token));
    let cancellation = Cancellation::new();
    state.cancellation.replace(cancellation.clone()).cancel();

    let Some(core) = this.upgrade() else {
        return Loadable::Error(Error::Cancelled);
    };
    let generation = core.derivation.as_ref().map_or(0, |derivation| derivation.generation());
    let tracker = Tracker::current().map_or_else(Tracker::disabled, |tracker| (*tracker).clone());
    let collecting = Rc::new(Cell::new(true));
    let owner: Weak<dyn LateTracking> = this.clone();
    let context = AsyncContext {
        track: Track::new(tracker, owner, generation, Rc::clone(&collecting)),
        cancellation,
        token,
    };

    let result = compute(&context);
    collecting.set(false);

    match result {
        Ok(AsyncValue::Ready(value)) => Loadable::Success(value),
        Err(Interrupt::Failed(error)) => Loadable::Error(error),
        Ok(AsyncValue::Pending(pending)) => {
            if let Some(result) = pending.result() {
                return Loadable::from_result(result);
            }
            let this = this.clone();
            let state = Rc::clone(state);
            pending.on_settle(move |result| {
                if !state.is_current(token) {
                    trace!(%token, "discarding settlement of a superseded computation");
                    return;
                }
                if let Some(core) = this.upgrade() {
                    core.overwrite(Ok(Loadable::from_result(result.clone())));
                }
            });
            Loadable::from_pending(&pending)
        }
        Err(Interrupt::Pending(suspension)) => {
            let this = this.clone();
            let state = Rc::clone(state);
            suspension.on_settle(move |_| {
                if !state.is_current(token) {
                    trace!(%token, "discarding suspension of a superseded computation");
                    return;
                }
                if let Some(core) = this.upgrade() {
                    core.invalidate();
                }
            });
            Loadable::Loading(suspension)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;

    #[test]
    fn ready_values_are_successes() {
        let source = signal(2);
        let doubled = async_signal({
            let source = source.clone();
            move |_| Ok(AsyncValue::Ready(source.read() * 2))
        });

        assert_eq!(doubled.read(), Loadable::Success(4));
        source.write(5);
        assert_eq!(doubled.read(), Loadable::Success(10));
    }

    #[test]
    fn failures_become_error_loadables() {
        let failing = async_signal::<i32, _>(|_| Err(Error::msg("offline").into()));
        let loadable = failing.read();
        assert!(loadable.is_error());
        assert_eq!(loadable.cause().map(ToString::to_string).as_deref(), Some("offline"));
    }

    #[test]
    fn returned_operation_overwrites_without_recomputing() {
        let (pending, resolver) = Pending::<i32>::new();
        let loaded = async_signal({
            let pending = pending.clone();
            move |_| Ok(AsyncValue::Pending(pending.clone()))
        });

        assert!(loaded.read().is_loading());
        resolver.resolve(42);
        assert_eq!(loaded.read(), Loadable::Success(42));
        assert_eq!(loaded.compute_count(), 1);
    }

    #[test]
    fn superseded_settlements_are_discarded() {
        let id = signal(1);
        let resolvers = Rc::new(RefCell::new(Vec::new()));
        let loaded = async_signal({
            let (id, resolvers) = (id.clone(), Rc::clone(&resolvers));
            move |_| {
                let _ = id.read();
                let (pending, resolver) = Pending::<&'static str>::new();
                resolvers.borrow_mut().push(resolver);
                Ok(AsyncValue::Pending(pending))
            }
        });
        let notifications = Rc::new(Cell::new(0));
        let counter = Rc::clone(&notifications);
        let _subscription = loaded.subscribe(move |_| counter.set(counter.get() + 1));
        assert!(loaded.read().is_loading());

        id.write(2);
        let after_switch = notifications.get();
        assert_eq!(resolvers.borrow().len(), 2);

        resolvers.borrow()[0].resolve("stale");
        assert!(loaded.read().is_loading());
        assert_eq!(notifications.get(), after_switch);

        resolvers.borrow()[1].resolve("fresh");
        assert_eq!(loaded.read(), Loadable::Success("fresh"));
        assert_eq!(notifications.get(), after_switch + 1);
    }

    #[test]
    fn superseded_computation_is_cancelled() {
        let id = signal(1);
        let handles = Rc::new(RefCell::new(Vec::new()));
        let loaded = async_signal({
            let (id, handles) = (id.clone(), Rc::clone(&handles));
            move |context: &AsyncContext| {
                handles.borrow_mut().push(context.cancellation.clone());
                Ok(AsyncValue::Ready(id.read()))
            }
        });

        let _ = loaded.read();
        id.write(2);
        let _ = loaded.read();

        let handles = handles.borrow();
        assert!(handles[0].is_cancelled());
        assert!(!handles[1].is_cancelled());
    }

    #[test]
    fn suspension_retries_the_whole_computation() {
        let (gate, open) = Pending::<()>::new();
        let loaded = async_signal({
            let gate = gate.clone();
            move |_| match gate.result() {
                Some(_) => Ok(AsyncValue::Ready("open")),
                None => Err(gate.suspension().into()),
            }
        });

        assert!(loaded.read().is_loading());
        open.resolve(());
        assert_eq!(loaded.read(), Loadable::Success("open"));
        assert_eq!(loaded.compute_count(), 2);
    }

    #[test]
    fn tracked_reads_after_the_computation_subscribe() {
        let late = signal(1);
        let tracks = Rc::new(RefCell::new(Vec::new()));
        let loaded = async_signal({
            let tracks = Rc::clone(&tracks);
            move |context: &AsyncContext| {
                tracks.borrow_mut().push(context.track.clone());
                Ok(AsyncValue::Ready(tracks.borrow().len()))
            }
        });

        assert_eq!(loaded.read(), Loadable::Success(1));
        let track = tracks.borrow()[0].clone();
        assert_eq!(track.read(&late), 1);
        assert_eq!(loaded.dependency_count(), 1);

        late.write(2);
        assert_eq!(loaded.read(), Loadable::Success(2));
    }
}
