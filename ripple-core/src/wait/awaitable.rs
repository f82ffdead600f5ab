//! Awaitable inputs and the shapes they come in.

use std::fmt;
use std::hash::Hash;

use indexmap::IndexMap;

use crate::reactive::Signal;
use crate::suspense::{Loadable, Pending};

/// Anything the wait combinators can resolve into a [`Loadable`].
pub enum Awaitable<T> {
    /// A plain value, already available.
    Value(T),
    /// A pending operation.
    Pending(Pending<T>),
    /// A loadable snapshot.
    Loadable(Loadable<T>),
    /// A signal. A failed or suspended derived signal resolves to an error or
    /// loading snapshot.
    Signal(Signal<T>),
    /// A signal holding a pending operation.
    PendingSignal(Signal<Pending<T>>),
    /// A signal holding a loadable, such as an async signal.
    LoadableSignal(Signal<Loadable<T>>),
}

impl<T: Clone + 'static> Awaitable<T> {
    /// Snapshot the current state. Signal reads are tracked.
    pub fn resolve(&self) -> Loadable<T> {
        match self {
            Self::Value(value) => Loadable::Success(value.clone()),
            Self::Pending(pending) => Loadable::from_pending(pending),
            Self::Loadable(loadable) => loadable.clone(),
            Self::Signal(signal) => Loadable::from_outcome(signal.try_read()),
            Self::PendingSignal(signal) => match signal.try_read() {
                Ok(pending) => Loadable::from_pending(&pending),
                Err(interrupt) => Loadable::from_outcome(Err(interrupt)),
            },
            Self::LoadableSignal(signal) => match signal.try_read() {
                Ok(loadable) => loadable,
                Err(interrupt) => Loadable::from_outcome(Err(interrupt)),
            },
        }
    }
}

impl<T: Clone> Clone for Awaitable<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Pending(pending) => Self::Pending(pending.clone()),
            Self::Loadable(loadable) => Self::Loadable(loadable.clone()),
            Self::Signal(signal) => Self::Signal(signal.clone()),
            Self::PendingSignal(signal) => Self::PendingSignal(signal.clone()),
            Self::LoadableSignal(signal) => Self::LoadableSignal(signal.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
            Self::Loadable(loadable) => f.debug_tuple("Loadable").field(loadable).finish(),
            Self::Signal(signal) => f.debug_tuple("Signal").field(&signal.id()).finish(),
            Self::PendingSignal(signal) => f.debug_tuple("PendingSignal").field(&signal.id()).finish(),
            Self::LoadableSignal(signal) => f.debug_tuple("LoadableSignal").field(&signal.id()).finish(),
        }
    }
}

impl<T> From<Pending<T>> for Awaitable<T> {
    fn from(pending: Pending<T>) -> Self {
        Self::Pending(pending)
    }
}

impl<T> From<Loadable<T>> for Awaitable<T> {
    fn from(loadable: Loadable<T>) -> Self {
        Self::Loadable(loadable)
    }
}

impl<T> From<Signal<T>> for Awaitable<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T> From<&Signal<T>> for Awaitable<T> {
    fn from(signal: &Signal<T>) -> Self {
        Self::Signal(signal.clone())
    }
}

/// Normalize a single awaitable into a [`Loadable`].
pub fn resolve_one<T: Clone + 'static>(awaitable: impl Into<Awaitable<T>>) -> Loadable<T> {
    awaitable.into().resolve()
}

/// A shape of awaitables: a single one, a list, or a keyed record.
///
/// The combinators resolve every entry, then rebuild the same shape around
/// the results. `Key` names an entry for [`any`](super::any) and
/// [`race`](super::race): `()` for a single awaitable, the index for a list,
/// the key for a record.
pub trait Awaitables {
    type Item: Clone + 'static;
    type Key;
    type Output<V>;

    /// Resolve every entry, in order.
    fn resolve_entries(self) -> Vec<(Self::Key, Loadable<Self::Item>)>;

    /// Rebuild the shape from one result per entry, in order.
    fn assemble<V>(entries: Vec<(Self::Key, V)>) -> Self::Output<V>;
}

fn single<V>(entries: Vec<((), V)>) -> V {
    entries
        .into_iter()
        .next()
        .map(|(_, value)| value)
        .expect("a single awaitable resolves to exactly one entry")
}

macro_rules! single_awaitable {
    ($($ty:ident),* $(,)?) => {$(
        impl<T: Clone + 'static> Awaitables for $ty<T> {
            type Item = T;
            type Key = ();
            type Output<V> = V;

            fn resolve_entries(self) -> Vec<((), Loadable<T>)> {
                vec![((), Awaitable::from(self).resolve())]
            }

            fn assemble<V>(entries: Vec<((), V)>) -> V {
                single(entries)
            }
        }
    )*};
}

single_awaitable!(Pending, Loadable, Signal);

impl<T: Clone + 'static> Awaitables for Awaitable<T> {
    type Item = T;
    type Key = ();
    type Output<V> = V;

    fn resolve_entries(self) -> Vec<((), Loadable<T>)> {
        vec![((), self.resolve())]
    }

    fn assemble<V>(entries: Vec<((), V)>) -> V {
        single(entries)
    }
}

impl<T: Clone + 'static> Awaitables for Vec<Awaitable<T>> {
    type Item = T;
    type Key = usize;
    type Output<V> = Vec<V>;

    fn resolve_entries(self) -> Vec<(usize, Loadable<T>)> {
        self.iter().map(Awaitable::resolve).enumerate().collect()
    }

    fn assemble<V>(entries: Vec<(usize, V)>) -> Vec<V> {
        entries.into_iter().map(|(_, value)| value).collect()
    }
}

impl<K, T> Awaitables for IndexMap<K, Awaitable<T>>
where
    K: Hash + Eq,
    T: Clone + 'static,
{
    type Item = T;
    type Key = K;
    type Output<V> = IndexMap<K, V>;

    fn resolve_entries(self) -> Vec<(K, Loadable<T>)> {
        self.into_iter()
            .map(|(key, awaitable)| {
                let loadable = awaitable.resolve();
                (key, loadable)
            })
            .collect()
    }

    fn assemble<V>(entries: Vec<(K, V)>) -> IndexMap<K, V> {
        entries.into_iter().collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
