//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless created with `defer`).
//!
//! 2. Every run starts by invoking the cleanups registered by the previous
//!    run. Those include the unsubscribe handles of the signals it read, so
//!    each run rebuilds its dependency set from scratch.
//!
//! 3. The run gets a fresh [`Cancellation`] and the previous run's handle is
//!    cancelled.
//!
//! 4. Signals read during the run are subscribed. A change queues a re-run
//!    on the [`Runtime`](super::Runtime).
//!
//! # Differences from Derived Signals
//!
//! - Derived signals return a value; effects do not.
//! - Derived signals are lazy when unobserved; effects are eager.
//! - Derived signals cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Effects can return a cleanup function, or register several through
//! [`EffectContext::on_cleanup`]. Cleanups are called before the effect
//! re-runs and when it is stopped.
//!
//! # Suspension
//!
//! A body may return [`Interrupt::Pending`]. The run then ends early and the
//! effect runs again once the suspension settles, unless it was re-run or
//! stopped in the meantime.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use tracing::{debug, error, trace};

use super::context::{Tracker, TRACKER};
use super::runtime::{JobKey, Runtime};
use super::signal::{Signal, SignalId, Source};
use crate::error::{Error, Interrupt, Outcome};
use crate::suspense::Cancellation;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    fn next() -> Self {
        Self(EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

/// A cleanup callback.
pub type Cleanup = Box<dyn FnOnce()>;

/// Return types accepted from an effect body.
///
/// Bodies may return nothing, a cleanup, an optional cleanup, or any of
/// those wrapped in a `Result` so that `?` works inside the body.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Outcome<Option<Cleanup>>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Outcome<Option<Cleanup>> {
        Ok(None)
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Outcome<Option<Cleanup>> {
        Ok(Some(self))
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Outcome<Option<Cleanup>> {
        Ok(self)
    }
}

impl<C: IntoCleanup> IntoCleanup for Result<C, Interrupt> {
    fn into_cleanup(self) -> Outcome<Option<Cleanup>> {
        self?.into_cleanup()
    }
}

impl<C: IntoCleanup> IntoCleanup for Result<C, Error> {
    fn into_cleanup(self) -> Outcome<Option<Cleanup>> {
        self?.into_cleanup()
    }
}

/// Options for [`effect_with`].
#[derive(Debug, Clone, Default)]
pub struct EffectOptions {
    /// Reported in log fields.
    pub name: Option<String>,
    /// Skip the initial run; the first run happens on [`Effect::run`].
    pub defer: bool,
}

impl EffectOptions {
    /// Set the name reported in log fields.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Skip the initial run.
    pub fn defer(mut self, defer: bool) -> Self {
        self.defer = defer;
        self
    }
}

// ----------------------------------------------------------------------------
// Explicit tracking
// ----------------------------------------------------------------------------

/// Receives dependencies registered after a run's synchronous part ended.
pub(crate) trait LateTracking {
    fn track_late(&self, generation: u64, id: SignalId, source: Rc<dyn Source>);
}

/// Explicit dependency registration for one run.
///
/// Reads through `Track` register the signal with the run that created it,
/// even after an `.await` point where the ambient tracking scope is gone.
/// Registrations made after the run was superseded are ignored.
#[derive(Clone)]
pub struct Track {
    tracker: Tracker,
    owner: Weak<dyn LateTracking>,
    generation: u64,
    collecting: Rc<Cell<bool>>,
}

impl Track {
    pub(crate) fn new(
        tracker: Tracker,
        owner: Weak<dyn LateTracking>,
        generation: u64,
        collecting: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            tracker,
            owner,
            generation,
            collecting,
        }
    }

    /// Read `signal` and register it as a dependency of this run.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Signal::read`].
    pub fn read<T: Clone + 'static>(&self, signal: &Signal<T>) -> T {
        self.register(signal);
        signal.peek()
    }

    /// Fallible form of [`Track::read`].
    pub fn try_read<T: Clone + 'static>(&self, signal: &Signal<T>) -> Outcome<T> {
        self.register(signal);
        signal.try_peek()
    }

    fn register<T: Clone + 'static>(&self, signal: &Signal<T>) {
        let core = &signal.core;
        if self.collecting.get() {
            self.tracker.record(core.id, || core.source());
        } else if let (Some(owner), Some(source)) = (self.owner.upgrade(), core.source()) {
            owner.track_late(self.generation, core.id, source);
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("generation", &self.generation)
            .field("collecting", &self.collecting.get())
            .finish()
    }
}

/// What an effect body receives on each run.
pub struct EffectContext {
    /// Explicit tracking for reads that happen after an `.await`.
    pub track: Track,
    /// Cancelled when this run is superseded or the effect is stopped.
    pub cancellation: Cancellation,
    effect: Weak<EffectCore>,
    generation: u64,
}

impl EffectContext {
    /// Register a cleanup for this run.
    ///
    /// If the run has already been superseded, the cleanup runs immediately.
    pub fn on_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + 'static,
    {
        match self.effect.upgrade() {
            Some(core) if core.generation.get() == self.generation && !core.stopped.get() => {
                core.cleanups.borrow_mut().push(Box::new(cleanup));
            }
            _ => cleanup(),
        }
    }
}

impl fmt::Debug for EffectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectContext")
            .field("generation", &self.generation)
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Effect
// ----------------------------------------------------------------------------

type Body = Box<dyn Fn(&EffectContext) -> Outcome<Option<Cleanup>>>;

struct EffectCore {
    id: EffectId,
    name: Option<Rc<str>>,
    this: Weak<EffectCore>,
    body: Body,
    cleanups: RefCell<Vec<Cleanup>>,
    cancellation: RefCell<Cancellation>,
    /// Incremented at the start of every run.
    generation: Cell<u64>,
    run_count: Cell<usize>,
    stopped: Cell<bool>,
    last_error: RefCell<Option<Error>>,
    dependencies: RefCell<IndexSet<SignalId>>,
}

impl EffectCore {
    fn run(&self) -> Result<(), Error> {
        if self.stopped.get() {
            return Ok(());
        }

        Runtime::propagate(|| {
            self.run_cleanups();

            let cancellation = Cancellation::new();
            self.cancellation.replace(cancellation.clone()).cancel();
            let generation = self.generation.get() + 1;
            self.generation.set(generation);
            self.run_count.set(self.run_count.get() + 1);

            let tracker = Tracker::new();
            let collecting = Rc::new(Cell::new(true));
            let owner: Weak<dyn LateTracking> = self.this.clone();
            let context = EffectContext {
                track: Track::new(tracker.clone(), owner, generation, Rc::clone(&collecting)),
                cancellation,
                effect: self.this.clone(),
                generation,
            };

            let outcome = TRACKER.scope(tracker.clone(), || (self.body)(&context));
            collecting.set(false);

            // The body may have stopped its own effect.
            if self.stopped.get() {
                trace!(effect = %self.id, "effect stopped during its run");
                if let Ok(Some(cleanup)) = outcome {
                    cleanup();
                }
                return Ok(());
            }

            for (id, source) in tracker.take() {
                self.subscribe_to(id, source);
            }

            trace!(
                effect = %self.id,
                name = self.name.as_deref(),
                dependencies = self.dependencies.borrow().len(),
                "effect ran"
            );

            match outcome {
                Ok(cleanup) => {
                    if let Some(cleanup) = cleanup {
                        self.cleanups.borrow_mut().push(cleanup);
                    }
                    self.last_error.replace(None);
                    Ok(())
                }
                Err(Interrupt::Pending(suspension)) => {
                    trace!(effect = %self.id, operation = %suspension.id(), "effect suspended");
                    let this = self.this.clone();
                    suspension.on_settle(move |_| {
                        if let Some(core) = this.upgrade() {
                            if core.generation.get() == generation {
                                core.schedule_rerun();
                            }
                        }
                    });
                    Ok(())
                }
                Err(Interrupt::Failed(error)) => {
                    self.last_error.replace(Some(error.clone()));
                    Err(error)
                }
            }
        })
    }

    fn subscribe_to(&self, id: SignalId, source: Rc<dyn Source>) {
        if self.stopped.get() || !self.dependencies.borrow_mut().insert(id) {
            return;
        }
        let Some(core) = self.this.upgrade() else {
            return;
        };
        let subscription = source.subscribe_changes(Rc::new(move || core.schedule_rerun()));
        self.cleanups
            .borrow_mut()
            .push(Box::new(move || subscription.unsubscribe()));
    }

    fn schedule_rerun(&self) {
        if self.stopped.get() {
            return;
        }
        let generation = self.generation.get();
        let this = self.this.clone();
        Runtime::schedule(JobKey::Effect(self.id), move || {
            let Some(core) = this.upgrade() else {
                return;
            };
            if core.generation.get() != generation {
                return;
            }
            if let Err(error) = core.run() {
                error!(effect = %core.id, name = core.name.as_deref(), %error, "effect failed");
            }
        });
    }

    fn run_cleanups(&self) {
        self.dependencies.borrow_mut().clear();
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
    }

    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        self.run_cleanups();
        let cancellation = self.cancellation.borrow().clone();
        cancellation.cancel();
        debug!(effect = %self.id, name = self.name.as_deref(), "effect stopped");
    }
}

impl LateTracking for EffectCore {
    fn track_late(&self, generation: u64, id: SignalId, source: Rc<dyn Source>) {
        if self.generation.get() == generation && !self.stopped.get() {
            trace!(effect = %self.id, dependency = %id, "late dependency registered");
            self.subscribe_to(id, source);
        }
    }
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// Dropping the handle does not stop the effect; call [`Effect::stop`].
///
/// # Example
///
/// ```rust,ignore
/// let count = signal(0);
///
/// let effect = effect({
///     let count = count.clone();
///     move |_| println!("Count is: {}", count.read())
/// });
///
/// count.write(5);  // Prints: "Count is: 5"
/// effect.stop();
/// ```
#[derive(Clone)]
pub struct Effect {
    core: Rc<EffectCore>,
}

impl Effect {
    /// Unique identity of this effect.
    pub fn id(&self) -> EffectId {
        self.core.id
    }

    /// The name given in [`EffectOptions`], if any.
    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }

    /// Run the effect now.
    ///
    /// Returns the body's failure, if any. Does nothing once stopped.
    pub fn run(&self) -> Result<(), Error> {
        self.core.run()
    }

    /// Run every cleanup and cancel the current run.
    ///
    /// Calling `stop` again has no effect.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Whether [`Effect::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.core.stopped.get()
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.core.run_count.get()
    }

    /// Number of signals the current run depends on.
    pub fn dependency_count(&self) -> usize {
        self.core.dependencies.borrow().len()
    }

    /// The failure of the most recent run, if it failed.
    pub fn last_error(&self) -> Option<Error> {
        self.core.last_error.borrow().clone()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("run_count", &self.core.run_count.get())
            .field("stopped", &self.core.stopped.get())
            .finish()
    }
}

/// Create an effect and run it once.
pub fn effect<F, R>(body: F) -> Effect
where
    F: Fn(&EffectContext) -> R + 'static,
    R: IntoCleanup,
{
    effect_with(body, EffectOptions::default())
}

/// Create an effect with explicit options.
///
/// A failure of the initial run is logged and kept in
/// [`Effect::last_error`].
pub fn effect_with<F, R>(body: F, options: EffectOptions) -> Effect
where
    F: Fn(&EffectContext) -> R + 'static,
    R: IntoCleanup,
{
    let core = Rc::new_cyclic(|this| EffectCore {
        id: EffectId::next(),
        name: options.name.map(Rc::from),
        this: this.clone(),
        body: Box::new(move |context: &EffectContext| body(context).into_cleanup()),
        cleanups: RefCell::new(Vec::new()),
        cancellation: RefCell::new(Cancellation::new()),
        generation: Cell::new(0),
        run_count: Cell::new(0),
        stopped: Cell::new(false),
        last_error: RefCell::new(None),
        dependencies: RefCell::new(IndexSet::new()),
    });

    let effect = Effect { core };
    if !options.defer {
        if let Err(error) = effect.run() {
            error!(effect = %effect.id(), name = effect.name(), %error, "effect failed");
        }
    }
    effect
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
