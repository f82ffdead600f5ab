//! Context Stack
//!
//! Ambient, stack-scoped state. A [`ContextToken<T>`] names a slot; entering
//! a scope pushes a value onto that slot's stack and the returned
//! [`ContextGuard`] pops it again when dropped. Signal reads use this to find
//! the active dependency tracker, and writes use it to find the active batch
//! queue, without threading either through every call.
//!
//! # Implementation
//!
//! Each thread has its own map of stacks, keyed by the token's name and
//! value type. Guards pop on drop, so restoration is exact on normal return,
//! on early `?` return and during unwinding. Nested scopes only shadow the
//! tokens they supply.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::signal::{SignalId, Source};

thread_local! {
    static CONTEXT_STACKS: RefCell<HashMap<ContextKey, Vec<StackEntry>>> = RefCell::new(HashMap::new());
    static NEXT_ENTRY: Cell<u64> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ContextKey {
    name: &'static str,
    type_id: TypeId,
}

struct StackEntry {
    serial: u64,
    value: Rc<dyn Any>,
}

/// A named slot of ambient state holding values of type `T`.
///
/// Tokens are identified by name and value type, so two tokens with the same
/// name and type address the same stack.
pub struct ContextToken<T: 'static> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ContextToken<T> {
    /// Declare a token. Usable in `static` items.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Label used in debug output.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn key(&self) -> ContextKey {
        ContextKey {
            name: self.name,
            type_id: TypeId::of::<T>(),
        }
    }

    /// Pair this token with a value, for use with [`with_context`].
    pub fn entry(&self, value: T) -> ContextEntry {
        ContextEntry {
            key: self.key(),
            value: Rc::new(value),
        }
    }

    /// Push `value` until the returned guard is dropped.
    pub fn enter(&self, value: T) -> ContextGuard {
        enter(std::iter::once(self.entry(value)))
    }

    /// Run `f` with `value` on top of this token's stack.
    pub fn scope<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter(value);
        f()
    }

    /// The innermost value for this token, if any scope is active.
    pub fn current(&self) -> Option<Rc<T>> {
        let key = self.key();
        let top = CONTEXT_STACKS.with(|stacks| {
            stacks
                .borrow()
                .get(&key)
                .and_then(|stack| stack.last())
                .map(|entry| Rc::clone(&entry.value))
        })?;
        top.downcast::<T>().ok()
    }

    /// Number of active scopes for this token.
    pub fn depth(&self) -> usize {
        let key = self.key();
        CONTEXT_STACKS.with(|stacks| stacks.borrow().get(&key).map_or(0, Vec::len))
    }
}

impl<T: 'static> fmt::Debug for ContextToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextToken")
            .field("name", &self.name)
            .field("depth", &self.depth())
            .finish()
    }
}

/// A `(token, value)` pair waiting to be pushed.
pub struct ContextEntry {
    key: ContextKey,
    value: Rc<dyn Any>,
}

impl fmt::Debug for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEntry").field("name", &self.key.name).finish()
    }
}

/// Pops the entries it pushed when dropped.
///
/// Guards must be dropped in reverse order of creation, which scoping
/// guarantees unless a guard is moved out of its scope.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
    pushed: SmallVec<[(ContextKey, u64); 2]>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // The thread-local may already be gone during thread teardown.
        let _ = CONTEXT_STACKS.try_with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            for (key, serial) in self.pushed.iter().rev() {
                let Some(stack) = stacks.get_mut(key) else {
                    continue;
                };
                let popped = stack.pop();
                debug_assert_eq!(
                    popped.as_ref().map(|entry| entry.serial),
                    Some(*serial),
                    "context stack mismatch for `{}`",
                    key.name
                );
                if stack.is_empty() {
                    stacks.remove(key);
                }
            }
        });
    }
}

/// Push every entry until the returned guard is dropped.
pub fn enter(entries: impl IntoIterator<Item = ContextEntry>) -> ContextGuard {
    let mut pushed = SmallVec::new();
    CONTEXT_STACKS.with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        for entry in entries {
            let serial = NEXT_ENTRY.with(|next| {
                let serial = next.get();
                next.set(serial + 1);
                serial
            });
            stacks.entry(entry.key).or_default().push(StackEntry {
                serial,
                value: entry.value,
            });
            pushed.push((entry.key, serial));
        }
    });
    ContextGuard { pushed }
}

/// Run `f` with every entry pushed, popping all of them afterwards.
pub fn with_context<R>(entries: impl IntoIterator<Item = ContextEntry>, f: impl FnOnce() -> R) -> R {
    let _guard = enter(entries);
    f()
}

// ----------------------------------------------------------------------------
// Dependency tracking
// ----------------------------------------------------------------------------

/// The tracking context: signals read while it is on top of the stack are
/// recorded as dependencies of the running computation.
pub(crate) static TRACKER: ContextToken<Tracker> = ContextToken::new("ripple.tracker");

/// Dependencies collected by one computation.
#[derive(Clone)]
pub(crate) struct Tracker {
    sources: Rc<RefCell<IndexMap<SignalId, Rc<dyn Source>>>>,
    enabled: bool,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self {
            sources: Rc::new(RefCell::new(IndexMap::new())),
            enabled: true,
        }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Record a dependency. `source` is only called for new dependencies.
    pub(crate) fn record(&self, id: SignalId, source: impl FnOnce() -> Option<Rc<dyn Source>>) {
        if !self.enabled || self.sources.borrow().contains_key(&id) {
            return;
        }
        if let Some(source) = source() {
            self.sources.borrow_mut().insert(id, source);
        }
    }

    /// Take the dependencies recorded so far.
    pub(crate) fn take(&self) -> IndexMap<SignalId, Rc<dyn Source>> {
        std::mem::take(&mut *self.sources.borrow_mut())
    }

    /// The innermost active tracker, if any.
    pub(crate) fn current() -> Option<Rc<Tracker>> {
        TRACKER.current()
    }
}

/// Run `f` without recording any signal reads as dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    TRACKER.scope(Tracker::disabled(), f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
