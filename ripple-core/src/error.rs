//! Error Types
//!
//! Everything a computation can "throw" is expressed as a value:
//!
//! - [`Error`] is a real failure. It is cheap to clone because a settled
//!   failure is shared by every reader of the operation or signal that
//!   produced it.
//! - [`Interrupt`] is what compute functions, effect bodies and the `wait`
//!   combinators return on the error path. It separates "not ready yet"
//!   ([`Interrupt::Pending`]) from an actual failure ([`Interrupt::Failed`]),
//!   so suspension never masquerades as an error.
//!
//! [`Outcome<T>`] is the result type used throughout the crate; `?` lifts an
//! [`Error`] or a [`Suspension`] into it.

use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

use crate::reactive::SignalId;
use crate::suspense::Suspension;

/// The result of a computation that may fail or suspend.
pub type Outcome<T> = Result<T, Interrupt>;

/// A settled failure.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A failure raised by user code.
    #[error("{0}")]
    Failed(Rc<dyn std::error::Error>),

    /// A failure described by a plain message.
    #[error("{0}")]
    Message(Rc<str>),

    /// A `wait::timeout` call expired before its inputs settled.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Every entry passed to `wait::any` failed.
    #[error("all {} awaited entries failed", .0.len())]
    AllFailed(Rc<[Error]>),

    /// A derived signal was read while its own computation was running.
    #[error("signal {0} was read while it was being computed")]
    Cycle(SignalId),

    /// The computation observed its cancellation handle.
    #[error("computation was cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an arbitrary error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::Failed(Rc::new(error))
    }

    /// Build an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(Rc::from(message.into()))
    }

    /// Individual causes carried by an aggregate failure.
    pub fn causes(&self) -> &[Error] {
        match self {
            Self::AllFailed(causes) => causes,
            _ => &[],
        }
    }

    /// Whether this is a timeout raised by `wait::timeout`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Identity comparison.
    ///
    /// Shared causes compare by pointer, so two failures are "the same" only
    /// when they came from the same settlement. Value-like variants compare
    /// structurally.
    pub fn same_as(&self, other: &Error) -> bool {
        match (self, other) {
            (Self::Failed(a), Self::Failed(b)) => Rc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => Rc::ptr_eq(a, b),
            (Self::AllFailed(a), Self::AllFailed(b)) => Rc::ptr_eq(a, b),
            (Self::Timeout(a), Self::Timeout(b)) => a == b,
            (Self::Cycle(a), Self::Cycle(b)) => a == b,
            (Self::Cancelled, Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// The non-value exit of a computation.
#[derive(Debug, Clone, Error)]
pub enum Interrupt {
    /// Not ready yet. The computation should be retried once the suspension
    /// settles.
    #[error("computation suspended on operation {}", .0.id())]
    Pending(Suspension),

    /// A real failure.
    #[error(transparent)]
    Failed(#[from] Error),
}

impl Interrupt {
    /// Whether this interrupt is a suspension rather than a failure.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The failure, if this is one.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Pending(_) => None,
        }
    }

    /// The suspension, if this is one.
    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Self::Pending(suspension) => Some(suspension),
            Self::Failed(_) => None,
        }
    }

    /// Identity comparison, see [`Error::same_as`].
    pub fn same_as(&self, other: &Interrupt) -> bool {
        match (self, other) {
            (Self::Pending(a), Self::Pending(b)) => a.id() == b.id(),
            (Self::Failed(a), Self::Failed(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl From<Suspension> for Interrupt {
    fn from(suspension: Suspension) -> Self {
        Self::Pending(suspension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn wrapped_errors_display_their_cause() {
        let error = Error::new(DiskError);
        assert_eq!(error.to_string(), "disk on fire");
        assert_eq!(Error::msg("boom").to_string(), "boom");
    }

    #[test]
    fn identity_follows_the_shared_cause() {
        let error = Error::msg("boom");
        let copy = error.clone();
        assert!(error.same_as(&copy));
        assert!(!error.same_as(&Error::msg("boom")));
        assert!(Error::Timeout(Duration::from_secs(1)).same_as(&Error::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn aggregate_exposes_every_cause() {
        let error = Error::AllFailed(Rc::from(vec![Error::msg("a"), Error::msg("b")]));
        assert_eq!(error.causes().len(), 2);
        assert_eq!(error.to_string(), "all 2 awaited entries failed");
        assert!(Error::msg("x").causes().is_empty());
    }

    #[test]
    fn errors_lift_into_interrupts() {
        fn fails() -> Outcome<()> {
            Err(Error::msg("nope"))?;
            Ok(())
        }

        let interrupt = fails().unwrap_err();
        assert!(!interrupt.is_pending());
        assert_eq!(interrupt.error().map(ToString::to_string).as_deref(), Some("nope"));
    }
}
