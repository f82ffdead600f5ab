//! Loadable
//!
//! A [`Loadable<T>`] is a snapshot of an asynchronous value: still loading,
//! succeeded, or failed. It is the value type of async signals and the
//! common currency of the `wait` combinators.
//!
//! # Operation Cache
//!
//! [`Loadable::from_pending`] normalizes a [`Pending`] through a thread-local
//! cache keyed by [`OperationId`]. The first lookup of an unsettled operation
//! creates the `Loading` entry and registers a settlement callback that
//! removes it again. After settlement the operation itself holds the
//! outcome, so the entry is not needed to answer later lookups and a
//! settled operation never maps back to `Loading`.
//!
//! Entries do not own their operation. An operation dropped before it
//! settles drops the eviction callback with it, which removes the entry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::error::{Error, Interrupt, Outcome};
use crate::suspense::{OperationId, Pending, Suspension, WeakSuspension};

thread_local! {
    static LOADABLE_CACHE: RefCell<HashMap<OperationId, WeakSuspension>> = RefCell::new(HashMap::new());
}

/// Removes a cache entry when the settlement callback holding it runs or is
/// dropped.
struct Evict(OperationId);

impl Drop for Evict {
    fn drop(&mut self) {
        let id = self.0;
        // The thread may be tearing down when a stray resolver fires.
        let removed = LOADABLE_CACHE
            .try_with(|cache| cache.try_borrow_mut().map(|mut cache| cache.remove(&id)))
            .ok()
            .and_then(Result::ok)
            .flatten();
        if removed.is_some() {
            trace!(operation = %id, "evicted operation from loadable cache");
        }
    }
}

/// Number of unsettled operations currently held by the loadable cache.
pub fn loadable_cache_len() -> usize {
    LOADABLE_CACHE.with(|cache| cache.borrow().len())
}

/// The tag of a [`Loadable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadableStatus {
    Loading,
    Success,
    Error,
}

/// A tagged pending/success/error snapshot.
#[derive(Clone)]
pub enum Loadable<T> {
    /// Still running. Carries the operation to wait on.
    Loading(Suspension),
    /// Finished with a value.
    Success(T),
    /// Finished with a failure.
    Error(Error),
}

impl<T> Loadable<T> {
    /// A loading snapshot waiting on `suspension`.
    pub fn loading(suspension: impl Into<Suspension>) -> Self {
        Self::Loading(suspension.into())
    }

    /// A successful snapshot.
    pub fn success(value: T) -> Self {
        Self::Success(value)
    }

    /// A failed snapshot.
    pub fn error(error: Error) -> Self {
        Self::Error(error)
    }

    /// Build from a settled result.
    pub fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Error(error),
        }
    }

    /// Build from an outcome; suspensions map to `Loading`.
    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        match outcome {
            Ok(value) => Self::Success(value),
            Err(Interrupt::Pending(suspension)) => Self::Loading(suspension),
            Err(Interrupt::Failed(error)) => Self::Error(error),
        }
    }

    pub fn status(&self) -> LoadableStatus {
        match self {
            Self::Loading(_) => LoadableStatus::Loading,
            Self::Success(_) => LoadableStatus::Success,
            Self::Error(_) => LoadableStatus::Error,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The value, if successful.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The failure, if failed.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// The operation being waited on, if loading.
    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Self::Loading(suspension) => Some(suspension),
            _ => None,
        }
    }

    /// Unwrap in "throw" form: loading suspends, failure fails.
    pub fn into_outcome(self) -> Outcome<T> {
        match self {
            Self::Loading(suspension) => Err(Interrupt::Pending(suspension)),
            Self::Success(value) => Ok(value),
            Self::Error(error) => Err(Interrupt::Failed(error)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loadable<U> {
        match self {
            Self::Loading(suspension) => Loadable::Loading(suspension),
            Self::Success(value) => Loadable::Success(f(value)),
            Self::Error(error) => Loadable::Error(error),
        }
    }
}

impl<T: Clone + 'static> Loadable<T> {
    /// Normalize a pending operation through the identity-keyed cache.
    pub fn from_pending(pending: &Pending<T>) -> Self {
        if let Some(result) = pending.result() {
            return Self::from_result(result);
        }

        let id = pending.id();
        let cached = LOADABLE_CACHE.with(|cache| cache.borrow().get(&id).and_then(WeakSuspension::upgrade));
        if let Some(suspension) = cached {
            return Self::Loading(suspension);
        }

        let suspension = pending.suspension();
        LOADABLE_CACHE.with(|cache| {
            cache.borrow_mut().insert(id, suspension.downgrade());
        });
        let evict = Evict(id);
        pending.on_settle(move |_| drop(evict));
        Self::Loading(suspension)
    }
}

impl<T: PartialEq> PartialEq for Loadable<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Loading(a), Self::Loading(b)) => a.id() == b.id(),
            (Self::Success(a), Self::Success(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Loadable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading(suspension) => f.debug_tuple("Loading").field(&suspension.id()).finish(),
            Self::Success(value) => f.debug_tuple("Success").field(value).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

impl<T> From<Result<T, Error>> for Loadable<T> {
    fn from(result: Result<T, Error>) -> Self {
        Self::from_result(result)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
