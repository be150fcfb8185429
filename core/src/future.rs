//! Read-only view over a [`Promise`] with blocking retrieval.
//!
//! A `Future` caches the outcome the first time it observes one, so repeated
//! [`Future::get`] and [`Future::wait`] calls return the same result without
//! touching the promise again. At most one wake-up latch is attached per
//! future, however many threads wait on it. The latch is opened by whichever
//! thread settles the promise, so blocked waiters never wait for a free
//! executor worker.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pledge_types::{Error, PromiseState};

use crate::executor::ExecutionContext;
use crate::promise::Promise;
use crate::sync::{CriticalSection, Signal};

struct Observed<T, E> {
    outcome: Option<Result<T, E>>,
    signal: Option<Arc<Signal>>,
}

impl<T, E> Observed<T, E> {
    fn record(&mut self, outcome: Result<T, E>) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
    }
}

/// Consumer-side handle to a promise.
///
/// Clones share the cached outcome and the wake-up latch.
pub struct Future<T, E = Error> {
    promise: Promise<T, E>,
    observed: Arc<CriticalSection<Observed<T, E>>>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            observed: Arc::clone(&self.observed),
        }
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    #[must_use]
    pub fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            observed: Arc::new(CriticalSection::new(Observed {
                outcome: None,
                signal: None,
            })),
        }
    }

    /// Current state without blocking.
    ///
    /// Returns the cached outcome if there is one; otherwise reads the
    /// promise and caches a terminal state. Never registers a callback.
    #[must_use]
    pub fn get(&self) -> PromiseState<T, E> {
        if let Some(outcome) = self.cached() {
            return outcome.into();
        }
        let state = self.promise.state();
        if let Some(outcome) = state.clone().into_result() {
            self.observed.synchronized(|observed| observed.record(outcome));
        }
        state
    }

    /// Block until the promise settles.
    pub fn wait(&self) -> Result<T, E> {
        loop {
            if let Some(outcome) = self.get().into_result() {
                return outcome;
            }
            self.signal().wait();
        }
    }

    /// Block until the promise settles or `timeout` elapses.
    ///
    /// Returns [`PromiseState::Pending`] on timeout. Timing out does not
    /// cancel the producer; a later call may still observe the outcome.
    pub fn wait_timeout(&self, timeout: Duration) -> PromiseState<T, E> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => self.wait().into(),
        }
    }

    /// Block until the promise settles or `deadline` passes.
    pub fn wait_until(&self, deadline: Instant) -> PromiseState<T, E> {
        let state = self.get();
        if state.is_terminal() || Instant::now() >= deadline {
            return state;
        }
        self.signal().wait_until(deadline);
        self.get()
    }

    /// Like [`Future::wait`], bounded by `default` when given.
    pub fn wait_for(&self, default: Option<Duration>) -> PromiseState<T, E> {
        match default {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait().into(),
        }
    }

    fn cached(&self) -> Option<Result<T, E>> {
        self.observed.synchronized(|observed| observed.outcome.clone())
    }

    /// The shared wake-up latch, attached to the promise on first use.
    fn signal(&self) -> Arc<Signal> {
        let (signal, created) = self.observed.synchronized(|observed| {
            if let Some(signal) = &observed.signal {
                return (Arc::clone(signal), false);
            }
            let signal = Arc::new(Signal::new());
            observed.signal = Some(Arc::clone(&signal));
            (signal, true)
        });

        if created {
            self.promise.release_on_settle(Arc::clone(&signal));
        }
        signal
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_success_on(self.promise.context(), callback)
    }

    /// Cache the value, then run `callback` with it on `context`.
    pub fn on_success_on<F>(&self, context: ExecutionContext, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let observed = Arc::clone(&self.observed);
        self.promise.then_on(context, move |value| {
            observed.synchronized(|observed| observed.record(Ok(value.clone())));
            callback(value);
        });
        self
    }

    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.on_error_on(self.promise.context(), callback)
    }

    pub fn on_error_on<F>(&self, context: ExecutionContext, callback: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        let observed = Arc::clone(&self.observed);
        self.promise.catch_on(context, move |error| {
            observed.synchronized(|observed| observed.record(Err(error.clone())));
            callback(error);
        });
        self
    }

    pub fn on_completion<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.on_completion_on(self.promise.context(), callback)
    }

    pub fn on_completion_on<F>(&self, context: ExecutionContext, callback: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let observed = Arc::clone(&self.observed);
        self.promise.finally_on(context, move |outcome| {
            observed.synchronized(|observed| observed.record(outcome.clone()));
            callback(outcome);
        });
        self
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.get().is_pending()
    }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.get().is_fulfilled()
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.get().is_rejected()
    }
}

impl<T, E> From<Promise<T, E>> for Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn from(promise: Promise<T, E>) -> Self {
        Self::new(promise)
    }
}

impl<T, E> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cached, latched) = self
            .observed
            .synchronized(|observed| (observed.outcome.is_some(), observed.signal.is_some()));
        f.debug_struct("Future")
            .field("promise", &self.promise)
            .field("cached", &cached)
            .field("latched", &latched)
            .finish()
    }
}
