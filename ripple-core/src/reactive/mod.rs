//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, derived
//! signals, batches and effects.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for state. When a signal's value is read within
//! a tracking context (a derived signal's computation or an effect run), the
//! signal registers itself as a dependency of that context. When the value
//! changes, every dependent is notified.
//!
//! ## Derived Signals
//!
//! A derived signal caches the result of a computation over other signals
//! and recomputes only when one of them changes.
//!
//! ## Batches
//!
//! A batch groups writes so that each changed signal notifies once, after
//! every write in the batch has been applied.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # Implementation Notes
//!
//! Dependency tracking goes through the [context stack](ContextToken): the
//! running computation pushes a tracker, and every signal read finds it
//! there. The work caused by a change is queued on the [`Runtime`] and run
//! after the notification pass that caused it.

mod batch;
mod context;
mod effect;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use batch::{batch, is_batching};
pub use context::{enter, untracked, with_context, ContextEntry, ContextGuard, ContextToken};
pub use effect::{effect, effect_with, Cleanup, Effect, EffectContext, EffectId, EffectOptions, IntoCleanup, Track};
pub use memo::{computed, computed_with, try_computed, try_computed_with, MemoState};
pub use runtime::Runtime;
pub use signal::{signal, signal_with, MutableSignal, Signal, SignalId, SignalOptions};
pub use subscriber::{ListenerId, Listeners, Subscription};

pub(crate) use context::Tracker;
pub(crate) use effect::LateTracking;
pub(crate) use memo::ComputeFn;
pub(crate) use signal::SignalCore;
