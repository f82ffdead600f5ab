//! Batched Updates
//!
//! Inside [`batch`], signal writes are applied immediately but their
//! notifications are queued, one entry per signal. When the outermost batch
//! returns, the queue is flushed in first-write order and each entry fires
//! once with the signal's final value. Work triggered by those notifications
//! (derived refreshes, effect re-runs) runs after the whole flush.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::context::{ContextGuard, ContextToken};
use super::runtime::Runtime;
use super::signal::SignalId;

type Notifier = Box<dyn FnOnce()>;

static BATCH: ContextToken<BatchQueue> = ContextToken::new("ripple.batch");

/// Pending notifications of the active batch, keyed by signal.
#[derive(Clone, Default)]
pub(crate) struct BatchQueue {
    entries: Rc<RefCell<IndexMap<SignalId, Notifier>>>,
}

impl BatchQueue {
    /// The queue of the active batch, if any.
    pub(crate) fn current() -> Option<Rc<BatchQueue>> {
        BATCH.current()
    }

    /// Queue `notifier` for `id`, replacing an earlier notifier for the same
    /// signal without changing its position.
    pub(crate) fn enqueue(&self, id: SignalId, notifier: Notifier) {
        self.entries.borrow_mut().insert(id, notifier);
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn flush(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for (_, notify) in entries {
            notify();
        }
    }
}

/// Whether a batch is active on this thread.
pub fn is_batching() -> bool {
    BATCH.depth() > 0
}

/// Run `f` with notifications deferred until it returns.
///
/// Nested calls run `f` directly; only the outermost batch flushes. If `f`
/// panics, the writes it made stay applied and their queued notifications
/// are still delivered while the panic unwinds.
///
/// # Example
///
/// ```rust,ignore
/// let a = signal(1);
/// let b = signal(2);
///
/// batch(|| {
///     a.write(10);
///     b.write(20);
/// });
/// // Subscribers of `a` and `b` ran once each, after both writes.
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    if is_batching() {
        return f();
    }

    let queue = BatchQueue::default();
    let _flush = Flush {
        scope: Some(BATCH.enter(queue.clone())),
        queue,
    };
    f()
}

/// Ends the outermost batch: pops its context, then flushes the queue.
struct Flush {
    scope: Option<ContextGuard>,
    queue: BatchQueue,
}

impl Drop for Flush {
    fn drop(&mut self) {
        // Listeners that write must not land in the finished batch.
        drop(self.scope.take());
        debug!(notifications = self.queue.len(), "flushing batch");
        Runtime::propagate(|| self.queue.flush());
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
