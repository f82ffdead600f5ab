//! Cooperative cancellation handles.
//!
//! Each effect run and each async-signal computation gets a fresh
//! [`Cancellation`]. Superseding or stopping the run cancels it. Nothing is
//! interrupted forcibly; work that can observe the handle is expected to
//! stop early.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::suspense::Pending;

#[derive(Default)]
struct Inner {
    cancelled: Cell<bool>,
    callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// An abort-style cancellation handle.
#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Rc<Inner>,
}

impl Cancellation {
    /// Create an uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the handle and run its callbacks.
    ///
    /// Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.replace(true) {
            return false;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Whether the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// `Err(Error::Cancelled)` once cancelled, for use with `?`.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `callback` on cancellation, or immediately if already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        if self.is_cancelled() {
            callback();
        } else {
            self.inner.callbacks.borrow_mut().push(Box::new(callback));
        }
    }

    /// An operation that succeeds when this handle is cancelled.
    ///
    /// Handy inside `tokio::select!` to abandon in-flight work.
    pub fn cancelled(&self) -> Pending<()> {
        let (pending, resolver) = Pending::new();
        self.on_cancel(move || {
            resolver.resolve(());
        });
        pending
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
