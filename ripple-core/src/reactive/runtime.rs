//! Reactive Runtime
//!
//! The runtime owns the deferred work queue that keeps propagation glitch
//! free. Signals notify their listeners synchronously, but the work those
//! notifications cause (refreshing an observed derived signal, re-running
//! an effect) is queued here and run after the notification pass.
//!
//! # How It Works
//!
//! 1. Every notification pass runs inside [`Runtime::propagate`], which
//!    holds the queue closed while it is active.
//!
//! 2. Listeners that need to do work call `Runtime::schedule` with a key.
//!    A job whose key is already queued is dropped.
//!
//! 3. When the outermost `propagate` returns, the queue is drained in FIFO
//!    order. Jobs may schedule further jobs, which join the same drain.
//!
//! For a diamond `a → (b, c) → d`, writing `a` queues `b` and `c`. Refreshing
//! `b` queues `d` behind `c`, so `d` recomputes once, after both inputs are
//! fresh.
//!
//! # Thread Safety
//!
//! The queue is thread-local. Each thread runs its own independent reactive
//! graph.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};

use tracing::trace;

use super::effect::EffectId;
use super::signal::SignalId;

type Job = Box<dyn FnOnce()>;

/// Deduplication key of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum JobKey {
    Signal(SignalId),
    Effect(EffectId),
}

#[derive(Default)]
struct Scheduler {
    queue: RefCell<VecDeque<(JobKey, Job)>>,
    queued: RefCell<HashSet<JobKey>>,
    holds: Cell<usize>,
    draining: Cell<bool>,
}

thread_local! {
    static SCHEDULER: Scheduler = Scheduler::default();
}

/// Releases a hold on drop, including during unwinding.
struct Hold;

impl Drop for Hold {
    fn drop(&mut self) {
        let _ = SCHEDULER.try_with(|scheduler| scheduler.holds.set(scheduler.holds.get() - 1));
    }
}

struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let _ = SCHEDULER.try_with(|scheduler| scheduler.draining.set(false));
    }
}

/// The per-thread reactive runtime.
///
/// All state is thread-local, so the type only carries associated functions.
pub struct Runtime;

impl Runtime {
    /// Run `f` as one notification pass, then run the work it queued.
    ///
    /// Nested calls join the outermost pass.
    pub fn propagate<R>(f: impl FnOnce() -> R) -> R {
        let result = {
            SCHEDULER.with(|scheduler| scheduler.holds.set(scheduler.holds.get() + 1));
            let _hold = Hold;
            f()
        };
        Self::drain_if_idle();
        result
    }

    /// Queue `job` under `key` unless a job with that key is already queued.
    pub(crate) fn schedule(key: JobKey, job: impl FnOnce() + 'static) {
        let accepted = SCHEDULER.with(|scheduler| {
            if !scheduler.queued.borrow_mut().insert(key) {
                return false;
            }
            scheduler.queue.borrow_mut().push_back((key, Box::new(job)));
            true
        });
        if accepted {
            trace!(job = ?key, "job scheduled");
            Self::drain_if_idle();
        }
    }

    /// Number of queued jobs.
    pub fn pending_jobs() -> usize {
        SCHEDULER.with(|scheduler| scheduler.queue.borrow().len())
    }

    /// Run queued jobs now, unless a notification pass or drain is active.
    pub fn flush() {
        Self::drain_if_idle();
    }

    fn drain_if_idle() {
        let idle = SCHEDULER.with(|scheduler| scheduler.holds.get() == 0 && !scheduler.draining.get());
        if idle {
            Self::drain();
        }
    }

    fn drain() {
        SCHEDULER.with(|scheduler| scheduler.draining.set(true));
        let _draining = Draining;

        loop {
            let next = SCHEDULER.with(|scheduler| {
                let next = scheduler.queue.borrow_mut().pop_front();
                if let Some((key, _)) = &next {
                    scheduler.queued.borrow_mut().remove(key);
                }
                next
            });
            let Some((_, job)) = next else {
                break;
            };
            job();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn key(n: u64) -> JobKey {
        JobKey::Effect(EffectId::from_raw(n))
    }

    #[test]
    fn jobs_run_immediately_when_idle() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        Runtime::schedule(key(u64::MAX), move || flag.set(true));
        assert!(ran.get());
        assert_eq!(Runtime::pending_jobs(), 0);
    }

    #[test]
    fn propagate_defers_and_deduplicates() {
        let log = Rc::new(RefCell::new(Vec::new()));

        Runtime::propagate(|| {
            for (n, tag) in [(1, "a"), (2, "b"), (1, "a again")] {
                let log = Rc::clone(&log);
                Runtime::schedule(key(u64::MAX - n), move || log.borrow_mut().push(tag));
            }
            assert_eq!(Runtime::pending_jobs(), 2);
            assert!(log.borrow().is_empty());
        });

        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn jobs_scheduled_while_draining_join_the_drain() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let outer = Rc::clone(&log);
        Runtime::propagate(|| {
            Runtime::schedule(key(u64::MAX - 10), move || {
                outer.borrow_mut().push("first");
                let inner = Rc::clone(&outer);
                Runtime::schedule(key(u64::MAX - 11), move || inner.borrow_mut().push("second"));
                outer.borrow_mut().push("first done");
            });
        });

        assert_eq!(*log.borrow(), vec!["first", "first done", "second"]);
    }

    #[test]
    fn nested_propagation_drains_once_at_the_outermost_level() {
        let ran = Rc::new(Cell::new(0));
        let counter = Rc::clone(&ran);
        Runtime::propagate(|| {
            Runtime::propagate(|| {
                Runtime::schedule(key(u64::MAX - 20), move || counter.set(counter.get() + 1));
            });
            assert_eq!(ran.get(), 0);
        });
        assert_eq!(ran.get(), 1);
    }
}
