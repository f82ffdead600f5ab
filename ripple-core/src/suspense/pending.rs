//! Pending Operations
//!
//! A [`Pending<T>`] is a single-settlement handle for work whose result is
//! not available yet. It plays the role a promise plays in other reactive
//! systems: signals and effects suspend on it, loadables are derived from
//! it, and the `wait` combinators aggregate it.
//!
//! # Settlement
//!
//! Every operation has a unique [`OperationId`] and a [`Resolver`] that
//! settles it. Settlement happens at most once; later attempts are ignored
//! and reported through the return value of [`Resolver::settle`]. Callbacks
//! registered with [`Pending::on_settle`] run exactly once, either at
//! settlement or immediately if the operation already settled.
//!
//! # Type Erasure
//!
//! Suspension does not care about the value type, only about "tell me when
//! this is done". [`Suspension`] is the type-erased view used by
//! [`Interrupt::Pending`](crate::Interrupt::Pending).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::error::Error;
use crate::reactive::Runtime;

/// Unique identifier of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

type Settled<T> = Result<T, Error>;
type Callback<T> = Box<dyn FnOnce(&Settled<T>)>;

enum State<T> {
    Waiting {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Settled(Settled<T>),
}

/// Shared state behind a [`Pending`] and its [`Resolver`].
struct Operation<T> {
    id: OperationId,
    state: RefCell<State<T>>,
}

impl<T: Clone + 'static> Operation<T> {
    fn new() -> Self {
        Self {
            id: OperationId::next(),
            state: RefCell::new(State::Waiting {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    fn result(&self) -> Option<Settled<T>> {
        match &*self.state.borrow() {
            State::Settled(result) => Some(result.clone()),
            State::Waiting { .. } => None,
        }
    }

    fn on_settle(&self, callback: Callback<T>) {
        // The borrow must end before the callback runs: it may register
        // further callbacks on this same operation.
        let settled = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Waiting { callbacks, .. } => {
                    callbacks.push(callback);
                    return;
                }
                State::Settled(result) => result.clone(),
            }
        };
        callback(&settled);
    }

    fn settle(&self, result: Settled<T>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.state.borrow_mut();
            if matches!(&*state, State::Settled(_)) {
                return false;
            }
            match std::mem::replace(&mut *state, State::Settled(result.clone())) {
                State::Waiting { callbacks, wakers } => (callbacks, wakers),
                State::Settled(_) => return false,
            }
        };

        trace!(operation = %self.id, ok = result.is_ok(), "operation settled");

        Runtime::propagate(|| {
            for callback in callbacks {
                callback(&result);
            }
        });
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// A handle to an operation that settles at most once.
///
/// Cloning the handle does not clone the operation: all clones observe the
/// same settlement and share the same [`OperationId`].
///
/// # Example
///
/// ```rust,ignore
/// let (pending, resolver) = Pending::new();
/// pending.on_settle(|result| println!("settled: {result:?}"));
/// resolver.resolve(42);
/// ```
pub struct Pending<T> {
    op: Rc<Operation<T>>,
}

impl<T: Clone + 'static> Pending<T> {
    /// Create an unsettled operation and the resolver that settles it.
    pub fn new() -> (Self, Resolver<T>) {
        let op = Rc::new(Operation::new());
        (Self { op: Rc::clone(&op) }, Resolver { op })
    }

    /// An operation that already succeeded.
    pub fn resolved(value: T) -> Self {
        let (pending, resolver) = Self::new();
        resolver.resolve(value);
        pending
    }

    /// An operation that already failed.
    pub fn rejected(error: Error) -> Self {
        let (pending, resolver) = Self::new();
        resolver.reject(error);
        pending
    }

    /// An operation that never settles.
    pub fn never() -> Self {
        Self {
            op: Rc::new(Operation::new()),
        }
    }

    /// Drive a future on the current `LocalSet` and settle with its output.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a `tokio::task::LocalSet`.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + 'static,
    {
        let (pending, resolver) = Self::new();
        tokio::task::spawn_local(async move {
            let result = future.await;
            resolver.settle(result);
        });
        pending
    }

    /// The operation's identity.
    pub fn id(&self) -> OperationId {
        self.op.id
    }

    /// Whether the operation has settled.
    pub fn is_settled(&self) -> bool {
        matches!(&*self.op.state.borrow(), State::Settled(_))
    }

    /// The settled result, if any.
    pub fn result(&self) -> Option<Result<T, Error>> {
        self.op.result()
    }

    /// Run `callback` once the operation settles.
    ///
    /// Runs immediately if the operation has already settled.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T, Error>) + 'static,
    {
        self.op.on_settle(Box::new(callback));
    }

    /// A type-erased view of this operation, sharing its identity.
    pub fn suspension(&self) -> Suspension {
        Suspension {
            op: Rc::clone(&self.op) as Rc<dyn ErasedOperation>,
        }
    }

    /// Whether two handles refer to the same operation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.op, &other.op)
    }
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            op: Rc::clone(&self.op),
        }
    }
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.op.id == other.op.id
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = matches!(&*self.op.state.borrow(), State::Settled(_));
        f.debug_struct("Pending")
            .field("id", &self.op.id)
            .field("settled", &settled)
            .finish()
    }
}

impl<T: Clone + 'static> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.op.state.borrow_mut();
        match &mut *state {
            State::Settled(result) => Poll::Ready(result.clone()),
            State::Waiting { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The settling side of a [`Pending`].
pub struct Resolver<T> {
    op: Rc<Operation<T>>,
}

impl<T: Clone + 'static> Resolver<T> {
    /// Settle with a value.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with a failure.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Settle with a result.
    ///
    /// Returns `false` if the operation had already settled, in which case
    /// nothing happens.
    pub fn settle(&self, result: Result<T, Error>) -> bool {
        self.op.settle(result)
    }

    /// The identity of the operation this resolver settles.
    pub fn id(&self) -> OperationId {
        self.op.id
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("id", &self.op.id).finish()
    }
}

// ----------------------------------------------------------------------------
// Type-erased suspension
// ----------------------------------------------------------------------------

trait ErasedOperation {
    fn id(&self) -> OperationId;
    fn outcome(&self) -> Option<Result<(), Error>>;
    fn on_settle_erased(&self, callback: Box<dyn FnOnce(Result<(), Error>)>);
}

impl<T: Clone + 'static> ErasedOperation for Operation<T> {
    fn id(&self) -> OperationId {
        self.id
    }

    fn outcome(&self) -> Option<Result<(), Error>> {
        match &*self.state.borrow() {
            State::Settled(Ok(_)) => Some(Ok(())),
            State::Settled(Err(error)) => Some(Err(error.clone())),
            State::Waiting { .. } => None,
        }
    }

    fn on_settle_erased(&self, callback: Box<dyn FnOnce(Result<(), Error>)>) {
        self.on_settle(Box::new(move |result: &Settled<T>| {
            callback(result.as_ref().map(|_| ()).map_err(Clone::clone))
        }));
    }
}

/// A type-erased pending operation.
///
/// This is what a computation "throws" when it cannot finish yet. The
/// reactive machinery subscribes to it and re-evaluates the computation once
/// it settles.
#[derive(Clone)]
pub struct Suspension {
    op: Rc<dyn ErasedOperation>,
}

impl Suspension {
    /// The identity of the underlying operation.
    pub fn id(&self) -> OperationId {
        self.op.id()
    }

    /// Whether the underlying operation has settled.
    pub fn is_settled(&self) -> bool {
        self.op.outcome().is_some()
    }

    /// The failure the operation settled with, if it failed.
    pub fn failure(&self) -> Option<Error> {
        match self.op.outcome() {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }

    /// Run `callback` once the operation settles.
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(Result<(), Error>) + 'static,
    {
        self.op.on_settle_erased(Box::new(callback));
    }

    /// A handle that does not keep the operation alive.
    pub(crate) fn downgrade(&self) -> WeakSuspension {
        WeakSuspension {
            op: Rc::downgrade(&self.op),
        }
    }

    /// A suspension that never settles.
    pub fn never() -> Self {
        Pending::<()>::never().suspension()
    }

    /// Settles once every part has succeeded, or fails with the first
    /// failure.
    ///
    /// A single part is passed through unchanged so its identity is kept.
    pub fn all(parts: Vec<Suspension>) -> Self {
        if parts.len() == 1 {
            if let Some(part) = parts.into_iter().next() {
                return part;
            }
            return Pending::resolved(()).suspension();
        }

        let (pending, resolver) = Pending::<()>::new();
        let resolver = Rc::new(resolver);
        let remaining = Rc::new(Cell::new(parts.len()));
        if parts.is_empty() {
            resolver.resolve(());
        }
        for part in parts {
            let resolver = Rc::clone(&resolver);
            let remaining = Rc::clone(&remaining);
            part.on_settle(move |result| match result {
                Ok(()) => {
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        resolver.resolve(());
                    }
                }
                Err(error) => {
                    resolver.reject(error);
                }
            });
        }
        pending.suspension()
    }

    /// Settles on the first success, or fails with every cause once all
    /// parts have failed.
    pub fn any(parts: Vec<Suspension>) -> Self {
        let (pending, resolver) = Pending::<()>::new();
        let resolver = Rc::new(resolver);
        let total = parts.len();
        let failures = Rc::new(RefCell::new(Vec::with_capacity(total)));
        if parts.is_empty() {
            resolver.reject(Error::AllFailed(Rc::from(Vec::new())));
        }
        for part in parts {
            let resolver = Rc::clone(&resolver);
            let failures = Rc::clone(&failures);
            part.on_settle(move |result| match result {
                Ok(()) => {
                    resolver.resolve(());
                }
                Err(error) => {
                    let mut failures = failures.borrow_mut();
                    failures.push(error);
                    if failures.len() == total {
                        let causes: Rc<[Error]> = Rc::from(std::mem::take(&mut *failures));
                        drop(failures);
                        resolver.reject(Error::AllFailed(causes));
                    }
                }
            });
        }
        pending.suspension()
    }

    /// Succeeds once every part has settled, whether it succeeded or failed.
    pub fn all_settled(parts: Vec<Suspension>) -> Self {
        let (pending, resolver) = Pending::<()>::new();
        let resolver = Rc::new(resolver);
        let remaining = Rc::new(Cell::new(parts.len()));
        if parts.is_empty() {
            resolver.resolve(());
        }
        for part in parts {
            let resolver = Rc::clone(&resolver);
            let remaining = Rc::clone(&remaining);
            part.on_settle(move |_| {
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    resolver.resolve(());
                }
            });
        }
        pending.suspension()
    }

    /// Settles the same way as whichever part settles first.
    pub fn first(parts: Vec<Suspension>) -> Self {
        let (pending, resolver) = Pending::<()>::new();
        let resolver = Rc::new(resolver);
        for part in parts {
            let resolver = Rc::clone(&resolver);
            part.on_settle(move |result| {
                resolver.settle(result);
            });
        }
        pending.suspension()
    }
}

impl<T: Clone + 'static> From<&Pending<T>> for Suspension {
    fn from(pending: &Pending<T>) -> Self {
        pending.suspension()
    }
}

impl PartialEq for Suspension {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("id", &self.id())
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// A non-owning [`Suspension`].
///
/// Once every owning handle is gone the operation is dropped together with
/// its unrun callbacks, so nothing can settle it any more.
#[derive(Clone)]
pub(crate) struct WeakSuspension {
    op: Weak<dyn ErasedOperation>,
}

impl WeakSuspension {
    pub(crate) fn upgrade(&self) -> Option<Suspension> {
        self.op.upgrade().map(|op| Suspension { op })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |entry: &str| sink.borrow_mut().push(entry.to_string()))
    }

    #[test]
    fn settles_exactly_once() {
        let (pending, resolver) = Pending::new();
        assert!(!pending.is_settled());

        assert!(resolver.resolve(1));
        assert!(!resolver.resolve(2));
        assert!(!resolver.reject(Error::msg("late")));

        assert_eq!(pending.result().map(Result::ok), Some(Some(1)));
    }

    #[test]
    fn callbacks_run_on_settlement_and_after() {
        let (log, record) = recorder();
        let record = Rc::new(record);
        let (pending, resolver) = Pending::new();

        let early = Rc::clone(&record);
        pending.on_settle(move |result: &Result<i32, Error>| {
            early(&format!("early {}", result.as_ref().map_or(-1, |v| *v)))
        });
        resolver.resolve(7);

        let late = Rc::clone(&record);
        pending.on_settle(move |result: &Result<i32, Error>| {
            late(&format!("late {}", result.as_ref().map_or(-1, |v| *v)))
        });

        assert_eq!(*log.borrow(), vec!["early 7", "late 7"]);
    }

    #[test]
    fn clones_share_identity() {
        let (pending, _resolver) = Pending::<u8>::new();
        let clone = pending.clone();
        assert_eq!(pending.id(), clone.id());
        assert!(pending.ptr_eq(&clone));
        assert_eq!(pending.suspension().id(), pending.id());
        assert_ne!(Pending::<u8>::never().id(), pending.id());
    }

    #[test]
    fn dropped_operation_releases_its_callbacks() {
        let marker = Rc::new(());
        let weak = {
            let (pending, resolver) = Pending::<i32>::new();
            let held = Rc::clone(&marker);
            pending.on_settle(move |_| drop(held));
            let weak = pending.suspension().downgrade();
            assert!(weak.upgrade().is_some());
            drop((pending, resolver));
            weak
        };

        assert!(weak.upgrade().is_none());
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn all_waits_for_every_part() {
        let (a, resolve_a) = Pending::<i32>::new();
        let (b, resolve_b) = Pending::<i32>::new();
        let combined = Suspension::all(vec![a.suspension(), b.suspension()]);

        resolve_a.resolve(1);
        assert!(!combined.is_settled());
        resolve_b.resolve(2);
        assert!(combined.is_settled());
        assert!(combined.failure().is_none());
    }

    #[test]
    fn all_passes_a_single_part_through() {
        let (a, _resolve) = Pending::<i32>::new();
        assert_eq!(Suspension::all(vec![a.suspension()]).id(), a.id());
    }

    #[test]
    fn all_fails_fast() {
        let (a, resolve_a) = Pending::<i32>::new();
        let (b, _resolve_b) = Pending::<i32>::new();
        let combined = Suspension::all(vec![a.suspension(), b.suspension()]);

        resolve_a.reject(Error::msg("broken"));
        assert_eq!(combined.failure().map(|e| e.to_string()).as_deref(), Some("broken"));
    }

    #[test]
    fn any_settles_on_first_success() {
        let (a, resolve_a) = Pending::<i32>::new();
        let (b, resolve_b) = Pending::<i32>::new();
        let combined = Suspension::any(vec![a.suspension(), b.suspension()]);

        resolve_a.reject(Error::msg("a failed"));
        assert!(!combined.is_settled());
        resolve_b.resolve(2);
        assert!(combined.is_settled());
        assert!(combined.failure().is_none());
    }

    #[test]
    fn any_fails_with_every_cause() {
        let (a, resolve_a) = Pending::<i32>::new();
        let (b, resolve_b) = Pending::<i32>::new();
        let combined = Suspension::any(vec![a.suspension(), b.suspension()]);

        resolve_a.reject(Error::msg("a"));
        resolve_b.reject(Error::msg("b"));
        let failure = combined.failure().expect("aggregate failure");
        assert_eq!(failure.causes().len(), 2);
    }

    #[test]
    fn all_settled_ignores_failures() {
        let (a, resolve_a) = Pending::<i32>::new();
        let (b, resolve_b) = Pending::<i32>::new();
        let combined = Suspension::all_settled(vec![a.suspension(), b.suspension()]);

        resolve_a.reject(Error::msg("a failed"));
        assert!(!combined.is_settled());
        resolve_b.resolve(2);
        assert!(combined.is_settled());
        assert!(combined.failure().is_none());
    }

    #[test]
    fn first_follows_the_earliest_settlement() {
        let (a, resolve_a) = Pending::<i32>::new();
        let (b, resolve_b) = Pending::<i32>::new();
        let combined = Suspension::first(vec![a.suspension(), b.suspension()]);

        resolve_b.reject(Error::msg("b first"));
        resolve_a.resolve(1);
        assert_eq!(combined.failure().map(|e| e.to_string()).as_deref(), Some("b first"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pending_is_a_future() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let pending = Pending::spawn(async { Ok::<_, Error>(5) });
                assert_eq!(pending.clone().await.ok(), Some(5));
                assert!(pending.is_settled());
            })
            .await;
    }
}
