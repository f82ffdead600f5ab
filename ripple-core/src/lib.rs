//! Ripple Core
//!
//! A single-threaded, fine-grained reactive state engine. It implements:
//!
//! - Signals, mutable and derived, with automatic dependency tracking
//! - Batched writes with one notification per changed signal
//! - Effects with cleanups, cancellation and explicit late tracking
//! - Suspense-style async values: pending operations, loadables and async
//!   signals
//! - Wait combinators over asynchronous inputs
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the context stack, signals, batches, effects and the
//!   propagation runtime
//! - `suspense`: pending operations, loadables, cancellation and async
//!   signals
//! - `wait`: combinators that read asynchronous inputs inside computations
//! - `error`: the failure and suspension types every computation returns
//!
//! All state lives in `Rc`s and thread locals. Signals are `!Send`, and two
//! threads never observe each other's graph.
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{computed, effect, signal};
//!
//! // Create a signal
//! let count = signal(0);
//!
//! // Create a derived value
//! let doubled = computed({
//!     let count = count.clone();
//!     move || count.read() * 2
//! });
//!
//! // Create an effect
//! let _log = effect({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move |_| println!("Count: {}, Doubled: {}", count.read(), doubled.read())
//! });
//!
//! // Update the signal
//! count.write(5);
//! // Effect runs again, prints: "Count: 5, Doubled: 10"
//! ```

pub mod error;
pub mod reactive;
pub mod suspense;
pub mod wait;

pub use error::{Error, Interrupt, Outcome};
pub use reactive::{
    batch, computed, computed_with, effect, effect_with, signal, signal_with, try_computed, try_computed_with,
    untracked, Effect, EffectContext, EffectOptions, MutableSignal, Signal, SignalOptions, Subscription, Track,
};
pub use suspense::{async_signal, async_signal_with, AsyncContext, AsyncValue, Cancellation, Loadable, Pending, Resolver, Suspension};
