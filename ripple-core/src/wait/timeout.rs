//! Timeouts
//!
//! A timeout races the awaited operations against a timer. Computations
//! re-run after every settlement, so the timer cannot live on the stack of a
//! single call: timers are registered per thread, keyed by the awaited
//! operations and the duration, and every re-run with the same inputs finds
//! the same timer again. A re-run whose remaining inputs are a subset of a
//! running timer's inputs joins that timer, so inputs settling one by one
//! never restart the deadline.
//!
//! A timer is released when its inputs settle, when an expired timer is
//! reported, or when the awaited operations are dropped unsettled.
//!
//! Timers run on tokio. Calling [`timeout`] while something is still loading
//! spawns the timer with `tokio::task::spawn_local`, which panics outside of
//! a `LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use smallvec::SmallVec;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Outcome};
use crate::suspense::{OperationId, Pending, Suspension};

use super::awaitable::Awaitables;
use super::combinators::collect;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TimerKey {
    operations: SmallVec<[OperationId; 4]>,
    duration: Duration,
}

impl TimerKey {
    fn new(pending: &[Suspension], duration: Duration) -> Self {
        let mut operations: SmallVec<[OperationId; 4]> = pending.iter().map(Suspension::id).collect();
        operations.sort_unstable();
        operations.dedup();
        Self { operations, duration }
    }

    /// Whether a timer under this key also waits for everything in `other`.
    fn covers(&self, other: &TimerKey) -> bool {
        self.duration == other.duration
            && other
                .operations
                .iter()
                .all(|id| self.operations.binary_search(id).is_ok())
    }
}

struct Timer {
    expired: Rc<Cell<bool>>,
    suspension: Suspension,
    handle: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Lookup {
    Missing,
    Waiting(Suspension),
    Expired(Timer),
}

/// Removes a timer when the settlement callback holding it runs, or is
/// dropped together with the awaited operations.
struct Release(TimerKey);

impl Drop for Release {
    fn drop(&mut self) {
        let key = &self.0;
        let removed = TIMERS
            .try_with(|timers| timers.try_borrow_mut().ok().and_then(|mut timers| timers.remove(key)))
            .ok()
            .flatten();
        if let Some(timer) = removed {
            trace!(duration = ?key.duration, expired = timer.expired.get(), "timer released");
        }
    }
}

thread_local! {
    static TIMERS: RefCell<HashMap<TimerKey, Timer>> = RefCell::new(HashMap::new());
}

/// Number of timers registered on this thread, including expired timers
/// that no computation has reported yet.
pub fn active_timers() -> usize {
    TIMERS.with(|timers| timers.borrow().len())
}

/// Resolve with [`all`](super::all), failing with [`Error::Timeout`] if the
/// awaited operations have not all settled within `duration`.
///
/// # Panics
///
/// Panics if a timer has to be started outside of a `tokio::task::LocalSet`.
pub fn timeout<A: Awaitables>(awaitables: A, duration: Duration) -> Outcome<A::Output<A::Item>> {
    timeout_with(awaitables, duration, move || Error::Timeout(duration))
}

/// Like [`timeout`], failing with the error built by `on_timeout`.
pub fn timeout_with<A, F>(awaitables: A, duration: Duration, on_timeout: F) -> Outcome<A::Output<A::Item>>
where
    A: Awaitables,
    F: FnOnce() -> Error,
{
    let entries = awaitables.resolve_entries();
    let pending: Vec<Suspension> = entries
        .iter()
        .filter_map(|(_, loadable)| loadable.suspension().cloned())
        .collect();
    if pending.is_empty() {
        return collect::<A>(entries);
    }

    let key = TimerKey::new(&pending, duration);
    match lookup(&key) {
        Lookup::Waiting(suspension) => return Err(suspension.into()),
        Lookup::Expired(_timer) => {
            debug!(?duration, "wait timed out");
            return Err(on_timeout().into());
        }
        Lookup::Missing => {}
    }

    let inputs = Suspension::all(pending);
    if inputs.is_settled() {
        return Err(inputs.into());
    }
    Err(start_timer(key, inputs).into())
}

/// Find the timer for `key`, or a running timer whose inputs include it.
///
/// An expired timer is taken out of the registry.
fn lookup(key: &TimerKey) -> Lookup {
    TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        let found = if timers.contains_key(key) {
            Some(key.clone())
        } else {
            timers.keys().find(|running| running.covers(key)).cloned()
        };
        let Some(found) = found else {
            return Lookup::Missing;
        };
        let state = timers
            .get(&found)
            .map(|timer| (timer.expired.get(), timer.suspension.clone()));
        match state {
            Some((true, _)) => timers.remove(&found).map_or(Lookup::Missing, Lookup::Expired),
            Some((false, suspension)) => Lookup::Waiting(suspension),
            None => Lookup::Missing,
        }
    })
}

fn start_timer(key: TimerKey, inputs: Suspension) -> Suspension {
    let expired = Rc::new(Cell::new(false));
    let (alarm, resolver) = Pending::<()>::new();
    let handle = tokio::task::spawn_local({
        let expired = Rc::clone(&expired);
        let duration = key.duration;
        async move {
            tokio::time::sleep(duration).await;
            expired.set(true);
            resolver.resolve(());
        }
    });

    let suspension = Suspension::first(vec![inputs.clone(), alarm.suspension()]);
    let replaced = TIMERS.with(|timers| {
        timers.borrow_mut().insert(
            key.clone(),
            Timer {
                expired,
                suspension: suspension.clone(),
                handle,
            },
        )
    });
    drop(replaced);

    let release = Release(key);
    inputs.on_settle(move |_| drop(release));
    suspension
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
