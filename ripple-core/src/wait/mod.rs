//! Wait Combinators
//!
//! Functions for reading asynchronous inputs inside reactive computations.
//! An input is anything convertible to an [`Awaitable`]: a plain value, a
//! [`Pending`](crate::Pending) operation, a [`Loadable`](crate::Loadable), or
//! a signal holding any of those. Inputs come alone, as a `Vec`, or as an
//! `IndexMap` record, and results keep the same shape.
//!
//! | Function     | Succeeds with                  | Waits while                  |
//! |--------------|--------------------------------|------------------------------|
//! | [`all`]      | every value                    | any input is loading         |
//! | [`any`]      | first success and its key      | no success, some loading     |
//! | [`race`]     | first completed entry          | nothing completed            |
//! | [`settled`]  | every [`Settlement`]           | any input is loading         |
//! | [`timeout`]  | every value                    | loading and not expired      |
//! | [`until`]    | every value, once accepted     | forever, until re-run        |
//!
//! Waiting is expressed as `Err(Interrupt::Pending(..))`, so `?` suspends
//! the calling derived signal or effect.

mod awaitable;
mod combinators;
mod timeout;

pub use awaitable::{resolve_one, Awaitable, Awaitables};
pub use combinators::{all, any, fallback, fallback_with, never, race, settled, until, wait, Settlement};
pub use timeout::{active_timers, timeout, timeout_with};
