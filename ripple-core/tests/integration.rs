//! Integration Tests for the Reactive Engine
//!
//! These tests verify that signals, batches, effects and async values work
//! together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::LocalSet;

use ripple_core::wait::{self, Awaitable};
use ripple_core::{
    async_signal, batch, computed, effect, signal, try_computed, AsyncValue, Error, Interrupt, Loadable, Outcome,
    Pending,
};

/// Test that writing an equal value notifies nobody.
#[test]
fn equal_write_is_silent() {
    let name = signal(String::from("ada"));
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let _subscription = name.subscribe(move |_| counter.set(counter.get() + 1));

    name.write(String::from("ada"));
    assert_eq!(calls.get(), 0);

    name.write(String::from("grace"));
    assert_eq!(calls.get(), 1);
}

/// Test that repeated writes in a batch notify once with the final value.
#[test]
fn batched_writes_notify_once() {
    let a = signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _subscription = a.subscribe(move |value| log.borrow_mut().push(*value));

    batch(|| {
        a.write(1);
        a.write(2);
        a.write(3);
    });

    assert_eq!(*seen.borrow(), vec![3]);
}

/// Test that only the outermost batch flushes.
#[test]
fn nested_batches_flush_once() {
    let a = signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _subscription = a.subscribe(move |value| log.borrow_mut().push(*value));

    batch(|| {
        a.write(1);
        batch(|| a.write(2));
        assert!(seen.borrow().is_empty());
        a.write(4);
    });

    assert_eq!(*seen.borrow(), vec![4]);
}

/// Test that a derived signal sees post-batch values and recomputes once.
#[test]
fn derived_signal_recomputes_once_per_batch() {
    let a = signal(1);
    let b = signal(2);
    let sum = computed({
        let (a, b) = (a.clone(), b.clone());
        move || a.read() + b.read()
    });

    assert_eq!(sum.read(), 3);
    let before = sum.compute_count();

    batch(|| {
        a.write(10);
        b.write(20);
    });

    assert_eq!(sum.read(), 30);
    assert_eq!(sum.compute_count(), before + 1);
}

/// Test that an observed derived signal also recomputes once per batch.
#[test]
fn observed_derived_signal_recomputes_once_per_batch() {
    let a = signal(1);
    let b = signal(2);
    let sum = computed({
        let (a, b) = (a.clone(), b.clone());
        move || a.read() + b.read()
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _log = effect({
        let (sum, seen) = (sum.clone(), Rc::clone(&seen));
        move |_| seen.borrow_mut().push(sum.read())
    });
    let before = sum.compute_count();

    batch(|| {
        a.write(10);
        b.write(20);
    });

    assert_eq!(*seen.borrow(), vec![3, 30]);
    assert_eq!(sum.compute_count(), before + 1);
}

/// Test that a diamond-shaped graph never exposes a half-updated state.
#[test]
fn diamond_propagation_is_glitch_free() {
    let a = signal(1);
    let left = computed({
        let a = a.clone();
        move || a.read() + 1
    });
    let right = computed({
        let a = a.clone();
        move || a.read() * 2
    });
    let bottom = computed({
        let (left, right) = (left.clone(), right.clone());
        move || left.read() + right.read()
    });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let _log = effect({
        let (bottom, seen) = (bottom.clone(), Rc::clone(&seen));
        move |_| seen.borrow_mut().push(bottom.read())
    });

    a.write(5);

    assert_eq!(*seen.borrow(), vec![4, 16]);
    assert_eq!(bottom.compute_count(), 2);
}

/// Test that peeking never subscribes.
#[test]
fn peek_never_subscribes() {
    let tracked = signal(0);
    let peeked = signal(0);
    let runs = effect({
        let (tracked, peeked) = (tracked.clone(), peeked.clone());
        move |_| {
            let _ = tracked.read() + peeked.peek();
        }
    });
    let peeking_memo = computed({
        let peeked = peeked.clone();
        move || peeked.peek() * 10
    });
    assert_eq!(peeking_memo.read(), 0);

    peeked.write(7);
    assert_eq!(runs.run_count(), 1);
    assert_eq!(peeking_memo.read(), 0);

    tracked.write(1);
    assert_eq!(runs.run_count(), 2);
}

/// Test that loadables unwrap through `wait::all`.
#[test]
fn loadables_unwrap_through_wait_all() {
    assert_eq!(wait::all(Loadable::success(7)).ok(), Some(7));

    let error = Error::msg("unavailable");
    let failure = wait::all(Loadable::<i32>::error(error.clone())).unwrap_err();
    assert!(failure.same_as(&Interrupt::Failed(error)));
}

/// Test that stopping an effect twice cleans up once.
#[test]
fn stopping_twice_cleans_up_once() {
    let source = signal(0);
    let cleanups = Rc::new(Cell::new(0));
    let handle = effect({
        let (source, cleanups) = (source.clone(), Rc::clone(&cleanups));
        move |context: &ripple_core::EffectContext| {
            let _ = source.read();
            let cleanups = Rc::clone(&cleanups);
            context.on_cleanup(move || cleanups.set(cleanups.get() + 1));
        }
    });

    handle.stop();
    handle.stop();

    assert_eq!(cleanups.get(), 1);
    source.write(1);
    assert_eq!(handle.run_count(), 1);
}

/// Test that an async signal moves from loading to success.
#[test]
fn async_signal_loads_then_succeeds() {
    let (pending, resolver) = Pending::<i32>::new();
    let answer = async_signal({
        let pending = pending.clone();
        move |_| Ok(AsyncValue::Pending(pending.clone()))
    });

    assert!(answer.read().is_loading());
    resolver.resolve(42);
    assert_eq!(answer.read(), Loadable::Success(42));
}

/// Test that a superseded async computation cannot overwrite a newer one.
#[test]
fn superseded_async_result_is_discarded() {
    let id = signal(1);
    let resolvers = Rc::new(RefCell::new(IndexMap::new()));
    let user = async_signal({
        let (id, resolvers) = (id.clone(), Rc::clone(&resolvers));
        move |_| {
            let id = id.read();
            let (pending, resolver) = Pending::<String>::new();
            resolvers.borrow_mut().insert(id, resolver);
            Ok(AsyncValue::Pending(pending))
        }
    });
    let changes = Rc::new(Cell::new(0));
    let counter = Rc::clone(&changes);
    let _subscription = user.subscribe(move |_| counter.set(counter.get() + 1));
    assert!(user.read().is_loading());

    id.write(2);
    let settled_before = changes.get();

    resolvers.borrow()[&1].resolve(String::from("user-1"));
    assert!(user.read().is_loading());
    assert_eq!(changes.get(), settled_before);

    resolvers.borrow()[&2].resolve(String::from("user-2"));
    assert_eq!(user.read(), Loadable::Success(String::from("user-2")));
    assert_eq!(changes.get(), settled_before + 1);
}

/// Test that `wait::any` returns a settled entry without waiting.
#[test]
fn any_prefers_a_settled_entry() {
    let (pending, _resolver) = Pending::<&'static str>::new();
    let mut entries = IndexMap::new();
    entries.insert("a", Awaitable::from(pending));
    entries.insert("b", Awaitable::Value("ready"));

    assert_eq!(wait::any(entries).ok(), Some(("ready", "b")));
}

/// Test that a derived signal waiting on several inputs resolves once they
/// are all available.
#[test]
fn derived_signal_waits_for_every_input() {
    let (price, set_price) = Pending::<u32>::new();
    let (tax, set_tax) = Pending::<u32>::new();
    let total = try_computed({
        let (price, tax) = (price.clone(), tax.clone());
        move || -> Outcome<u32> {
            let parts = wait::all(vec![Awaitable::from(price.clone()), Awaitable::from(tax.clone())])?;
            Ok(parts.iter().sum())
        }
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _log = effect({
        let (total, seen) = (total.clone(), Rc::clone(&seen));
        move |_| -> Outcome<()> {
            seen.borrow_mut().push(total.try_read()?);
            Ok(())
        }
    });

    assert!(total.try_read().unwrap_err().is_pending());
    set_price.resolve(100);
    assert!(seen.borrow().is_empty());
    set_tax.resolve(8);

    assert_eq!(*seen.borrow(), vec![108]);
}

/// Test that `fallback` turns a failed input into a default.
#[test]
fn fallback_recovers_from_failed_signal() {
    let flaky = try_computed::<i32, _>(|| Err(Error::msg("flaky").into()));
    let safe = try_computed({
        let flaky = flaky.clone();
        move || -> Outcome<i32> {
            let (value, _) = wait::fallback(|| Ok(flaky.clone()), -1)?;
            Ok(value)
        }
    });

    assert_eq!(safe.read(), -1);
}

/// Test that an async signal backed by a spawned future settles on tokio.
#[tokio::test(start_paused = true)]
async fn spawned_async_signal_settles() {
    LocalSet::new()
        .run_until(async {
            let base = signal(20);
            let loaded = async_signal({
                let base = base.clone();
                move |_| {
                    let base = base.read();
                    Ok(AsyncValue::Pending(Pending::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(base + 22)
                    })))
                }
            });

            assert!(loaded.read().is_loading());
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(loaded.read(), Loadable::Success(42));
        })
        .await;
}

/// Test that a derived signal using `wait::timeout` fails once time runs out.
#[tokio::test(start_paused = true)]
async fn derived_signal_times_out() {
    LocalSet::new()
        .run_until(async {
            let (slow, _resolver) = Pending::<i32>::new();
            let guarded = try_computed({
                let slow = slow.clone();
                move || wait::timeout(slow.clone(), Duration::from_millis(30))
            });
            let failures = Rc::new(Cell::new(0));
            let _watch = effect({
                let (guarded, failures) = (guarded.clone(), Rc::clone(&failures));
                move |_| {
                    if let Err(Interrupt::Failed(error)) = guarded.try_read() {
                        assert!(error.is_timeout());
                        failures.set(failures.get() + 1);
                    }
                }
            });

            assert!(guarded.try_read().unwrap_err().is_pending());
            tokio::time::sleep(Duration::from_millis(50)).await;

            assert_eq!(failures.get(), 1);
            assert_eq!(wait::active_timers(), 0);
        })
        .await;
}
