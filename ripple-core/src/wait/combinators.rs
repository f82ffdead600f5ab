//! Resolution combinators over [`Awaitables`].
//!
//! Each combinator returns an [`Outcome`]: `Ok` when it can answer now,
//! `Err(Interrupt::Pending(..))` when it has to wait, and
//! `Err(Interrupt::Failed(..))` when an awaited entry failed. Used inside a
//! derived signal or an effect, the pending case makes the surrounding
//! computation run again once the awaited operations settle.

use std::fmt;

use crate::error::{Error, Interrupt, Outcome};
use crate::suspense::{Loadable, Suspension};

use super::awaitable::Awaitables;

/// The settled state of one entry, as reported by [`settled`].
#[derive(Clone)]
pub enum Settlement<T> {
    Fulfilled(T),
    Rejected(Error),
}

impl<T> Settlement<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&Error> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(error) => Some(error),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Settlement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfilled(value) => f.debug_tuple("Fulfilled").field(value).finish(),
            Self::Rejected(error) => f.debug_tuple("Rejected").field(error).finish(),
        }
    }
}

fn suspensions<K, T>(entries: &[(K, Loadable<T>)]) -> Vec<Suspension> {
    entries
        .iter()
        .filter_map(|(_, loadable)| loadable.suspension().cloned())
        .collect()
}

/// Unwrap fully resolved entries: the first failure in input order, or every
/// value in the input shape.
pub(crate) fn collect<A: Awaitables>(
    entries: Vec<(A::Key, Loadable<A::Item>)>,
) -> Outcome<A::Output<A::Item>> {
    let mut values = Vec::with_capacity(entries.len());
    for (key, loadable) in entries {
        match loadable {
            Loadable::Success(value) => values.push((key, value)),
            Loadable::Error(error) => return Err(error.into()),
            Loadable::Loading(suspension) => return Err(suspension.into()),
        }
    }
    Ok(A::assemble(values))
}

/// Wait for every entry and return the values in the input shape.
///
/// While any entry is loading, suspends on all loading entries together.
/// Once nothing is loading, the first failure in input order is returned.
///
/// # Example
///
/// ```rust,ignore
/// let total = try_computed(move || {
///     let parts = wait::all(vec![Awaitable::from(&price), Awaitable::from(&tax)])?;
///     Ok(parts.iter().sum::<u32>())
/// });
/// ```
pub fn all<A: Awaitables>(awaitables: A) -> Outcome<A::Output<A::Item>> {
    let entries = awaitables.resolve_entries();
    let pending = suspensions(&entries);
    if !pending.is_empty() {
        return Err(Suspension::all(pending).into());
    }
    collect::<A>(entries)
}

/// Same as [`all`].
pub fn wait<A: Awaitables>(awaitables: A) -> Outcome<A::Output<A::Item>> {
    all(awaitables)
}

/// Return the first successful entry and its key.
///
/// Fails with [`Error::AllFailed`] only once every entry has failed.
/// Otherwise suspends until one of the loading entries settles.
pub fn any<A: Awaitables>(awaitables: A) -> Outcome<(A::Item, A::Key)> {
    let mut causes = Vec::new();
    let mut pending = Vec::new();
    for (key, loadable) in awaitables.resolve_entries() {
        match loadable {
            Loadable::Success(value) => return Ok((value, key)),
            Loadable::Error(error) => causes.push(error),
            Loadable::Loading(suspension) => pending.push(suspension),
        }
    }
    if pending.is_empty() {
        return Err(Error::AllFailed(causes.into()).into());
    }
    Err(Suspension::any(pending).into())
}

/// Return or fail with the first entry, in input order, that has completed.
///
/// Suspends until the first loading entry settles if nothing has completed.
/// An empty input never completes.
pub fn race<A: Awaitables>(awaitables: A) -> Outcome<(A::Item, A::Key)> {
    let mut pending = Vec::new();
    for (key, loadable) in awaitables.resolve_entries() {
        match loadable {
            Loadable::Success(value) => return Ok((value, key)),
            Loadable::Error(error) => return Err(error.into()),
            Loadable::Loading(suspension) => pending.push(suspension),
        }
    }
    Err(Suspension::first(pending).into())
}

/// Report every entry as fulfilled or rejected, never failing.
///
/// Suspends while any entry is still loading.
pub fn settled<A: Awaitables>(awaitables: A) -> Outcome<A::Output<Settlement<A::Item>>> {
    let entries = awaitables.resolve_entries();
    let pending = suspensions(&entries);
    if !pending.is_empty() {
        return Err(Suspension::all_settled(pending).into());
    }

    let settlements = entries
        .into_iter()
        .filter_map(|(key, loadable)| match loadable {
            Loadable::Success(value) => Some((key, Settlement::Fulfilled(value))),
            Loadable::Error(error) => Some((key, Settlement::Rejected(error))),
            Loadable::Loading(_) => None,
        })
        .collect();
    Ok(A::assemble(settlements))
}

/// Run `f` and resolve its result with [`all`], replacing a failure with
/// `value`.
///
/// Returns the value together with the failure it replaced, if any. A
/// suspension is passed through: still waiting is not a failure.
pub fn fallback<A, F>(f: F, value: A::Output<A::Item>) -> Outcome<(A::Output<A::Item>, Option<Error>)>
where
    A: Awaitables,
    F: FnOnce() -> Outcome<A>,
{
    fallback_with(f, move |_| value)
}

/// Like [`fallback`], building the replacement from the failure.
pub fn fallback_with<A, F, G>(f: F, make: G) -> Outcome<(A::Output<A::Item>, Option<Error>)>
where
    A: Awaitables,
    F: FnOnce() -> Outcome<A>,
    G: FnOnce(&Error) -> A::Output<A::Item>,
{
    match f().and_then(all) {
        Ok(value) => Ok((value, None)),
        Err(Interrupt::Pending(suspension)) => Err(Interrupt::Pending(suspension)),
        Err(Interrupt::Failed(error)) => Ok((make(&error), Some(error))),
    }
}

/// Resolve with [`all`] and return the result once `predicate` accepts it.
///
/// Until then the computation suspends forever; it only runs again when one
/// of the signals it read changes.
pub fn until<A, P>(awaitables: A, predicate: P) -> Outcome<A::Output<A::Item>>
where
    A: Awaitables,
    P: FnOnce(&A::Output<A::Item>) -> bool,
{
    let value = all(awaitables)?;
    if predicate(&value) {
        Ok(value)
    } else {
        never()
    }
}

/// Suspend on an operation that never settles.
pub fn never<T>() -> Outcome<T> {
    Err(Suspension::never().into())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
