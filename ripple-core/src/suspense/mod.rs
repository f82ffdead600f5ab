//! Asynchronous Values
//!
//! Building blocks for values that are not available yet:
//!
//! - [`Pending`] / [`Resolver`]: a single-settlement operation and the
//!   handle that settles it.
//! - [`Suspension`]: the type-erased operation a computation returns through
//!   [`Interrupt::Pending`](crate::Interrupt::Pending) when it cannot finish
//!   yet.
//! - [`Loadable`]: a loading / success / error snapshot of an operation.
//! - [`Cancellation`]: the per-run abort handle given to effects and async
//!   computations.
//! - [`async_signal`]: a derived signal producing a `Loadable`.

mod async_signal;
mod cancel;
mod loadable;
mod pending;

pub use async_signal::{async_signal, async_signal_with, AsyncContext, AsyncValue, ComputationToken};
pub use cancel::Cancellation;
pub use loadable::{loadable_cache_len, Loadable, LoadableStatus};
pub use pending::{OperationId, Pending, Resolver, Suspension};
pub(crate) use pending::WeakSuspension;
