//! Single-assignment asynchronous result cell.
//!
//! A [`Promise`] starts pending and settles exactly once, either fulfilled
//! with a value or rejected with an error. The first `resolve`/`reject` wins;
//! every later call is ignored. Any number of continuations can be attached
//! before or after settlement, each scheduled on the execution context the
//! caller chose:
//!
//! ```text
//! let promise = Promise::new(|resolver| {
//!     fetch(move |result| match result {
//!         Ok(profile) => resolver.resolve(profile),
//!         Err(err) => resolver.reject(err),
//!     });
//!     Ok(())
//! });
//!
//! promise
//!     .map(|profile| profile.avatar_url)
//!     .then(|url| println!("{url}"))
//!     .catch(|err| eprintln!("{err}"));
//! ```
//!
//! # Invariants
//!
//! - The state check and the transition happen inside one critical section,
//!   so racing completions cannot both observe `Pending`.
//! - Continuations are drained from the list by the transition and handed to
//!   their contexts in registration order, after the lock is released.
//! - A continuation registered on a settled promise is scheduled on its
//!   context, never run on the registering thread.
//! - Wake-up latches for blocked waiters are opened by the settling thread
//!   itself, so a waiter never depends on a free executor worker.
//! - A derived promise is owned only by the continuation registered on its
//!   parent; there is no back-reference from child to parent.

use std::fmt;
use std::sync::Arc;

use pledge_types::{Error, PromiseState};

use crate::executor::{self, ExecutionContext};
use crate::future::Future;
use crate::sync::{CriticalSection, Signal};

type Handler<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

struct Continuation<T, E> {
    context: ExecutionContext,
    handler: Handler<T, E>,
}

impl<T, E> Continuation<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn dispatch(self, outcome: Result<T, E>) {
        let Continuation { context, handler } = self;
        context.execute(Box::new(move || handler(outcome)));
    }
}

struct Core<T, E> {
    state: PromiseState<T, E>,
    continuations: Vec<Continuation<T, E>>,
    latches: Vec<Arc<Signal>>,
}

struct Shared<T, E> {
    core: CriticalSection<Core<T, E>>,
    context: ExecutionContext,
}

/// Single-assignment asynchronous result.
///
/// Cloning a `Promise` clones the handle, not the result cell.
pub struct Promise<T, E = Error> {
    shared: Arc<Shared<T, E>>,
}

/// Producer-side capability to settle a promise.
///
/// Clones settle the same promise; only the first settlement across all
/// clones has any effect.
pub struct Resolver<T, E = Error> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn with_state(context: ExecutionContext, state: PromiseState<T, E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: CriticalSection::new(Core {
                    state,
                    continuations: Vec::new(),
                    latches: Vec::new(),
                }),
                context,
            }),
        }
    }

    /// Start `task` on the shared background context.
    ///
    /// The task receives a [`Resolver`] and must eventually settle it, now or
    /// from some later callback. Returning `Err` rejects the promise.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E> + Send + 'static,
    {
        Self::new_on(executor::background(), task)
    }

    /// Start `task` on `context`. The promise's default continuation context
    /// is `context` as well.
    pub fn new_on<F>(context: ExecutionContext, task: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E> + Send + 'static,
    {
        let (promise, resolver) = Self::pending_on(Arc::clone(&context));
        context.execute(Box::new(move || {
            if let Err(err) = task(resolver.clone()) {
                resolver.reject(err);
            }
        }));
        promise
    }

    /// A pending promise settled from outside through the returned resolver.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T, E>) {
        Self::pending_on(executor::background())
    }

    #[must_use]
    pub fn pending_on(context: ExecutionContext) -> (Self, Resolver<T, E>) {
        let promise = Self::with_state(context, PromiseState::Pending);
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::with_state(executor::background(), PromiseState::Fulfilled(value))
    }

    #[must_use]
    pub fn rejected(error: E) -> Self {
        Self::with_state(executor::background(), PromiseState::Rejected(error))
    }

    /// Fulfill the promise. Returns `false` if it had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the promise. Returns `false` if it had already settled.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let drained = self.shared.core.synchronized(|core| {
            if !core.state.is_pending() {
                return None;
            }
            core.state = PromiseState::from(outcome.clone());
            Some((
                std::mem::take(&mut core.continuations),
                std::mem::take(&mut core.latches),
            ))
        });

        let Some((continuations, latches)) = drained else {
            tracing::trace!("Ignoring settlement of an already settled promise");
            return false;
        };

        for latch in latches {
            latch.release();
        }
        tracing::debug!(
            state = if outcome.is_ok() { "fulfilled" } else { "rejected" },
            continuations = continuations.len(),
            "Promise settled"
        );
        for continuation in continuations {
            continuation.dispatch(outcome.clone());
        }
        true
    }

    fn register(&self, context: ExecutionContext, handler: Handler<T, E>) {
        let continuation = Continuation { context, handler };
        let ready = self.shared.core.synchronized(move |core| {
            match core.state.clone().into_result() {
                None => {
                    core.continuations.push(continuation);
                    None
                }
                Some(outcome) => Some((continuation, outcome)),
            }
        });

        if let Some((continuation, outcome)) = ready {
            continuation.dispatch(outcome);
        }
    }

    /// Open `latch` once the promise settles, on the settling thread.
    pub(crate) fn release_on_settle(&self, latch: Arc<Signal>) {
        let settled = self.shared.core.synchronized(|core| {
            if core.state.is_pending() {
                core.latches.push(Arc::clone(&latch));
                false
            } else {
                true
            }
        });
        if settled {
            latch.release();
        }
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Register both handlers on `context`. Exactly one of them runs, once.
    pub fn subscribe_on<F, R>(
        &self,
        context: ExecutionContext,
        on_fulfilled: F,
        on_rejected: R,
    ) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
        R: FnOnce(E) + Send + 'static,
    {
        self.register(
            context,
            Box::new(move |outcome| match outcome {
                Ok(value) => on_fulfilled(value),
                Err(error) => on_rejected(error),
            }),
        );
        self
    }

    pub fn subscribe<F, R>(&self, on_fulfilled: F, on_rejected: R) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
        R: FnOnce(E) + Send + 'static,
    {
        self.subscribe_on(self.context(), on_fulfilled, on_rejected)
    }

    pub fn then<F>(&self, on_fulfilled: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.subscribe_on(self.context(), on_fulfilled, |_| {})
    }

    pub fn then_on<F>(&self, context: ExecutionContext, on_fulfilled: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.subscribe_on(context, on_fulfilled, |_| {})
    }

    pub fn catch<R>(&self, on_rejected: R) -> &Self
    where
        R: FnOnce(E) + Send + 'static,
    {
        self.subscribe_on(self.context(), |_| {}, on_rejected)
    }

    pub fn catch_on<R>(&self, context: ExecutionContext, on_rejected: R) -> &Self
    where
        R: FnOnce(E) + Send + 'static,
    {
        self.subscribe_on(context, |_| {}, on_rejected)
    }

    /// Run `on_settled` with the outcome, whichever way the promise settles.
    pub fn finally<F>(&self, on_settled: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.finally_on(self.context(), on_settled)
    }

    pub fn finally_on<F>(&self, context: ExecutionContext, on_settled: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.register(context, Box::new(on_settled));
        self
    }

    // ------------------------------------------------------------------------
    // Derived promises
    // ------------------------------------------------------------------------

    pub fn map<U, F>(&self, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_on(self.context(), transform)
    }

    pub fn map_on<U, F>(&self, context: ExecutionContext, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map_on(context, move |value| Ok(transform(value)))
    }

    /// Derive a promise from a fallible transform. An `Err` from `transform`
    /// rejects the derived promise only; a rejected parent skips `transform`.
    pub fn try_map<U, F>(&self, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.try_map_on(self.context(), transform)
    }

    pub fn try_map_on<U, F>(&self, context: ExecutionContext, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let (derived, resolver) = Promise::pending_on(Arc::clone(&context));
        self.finally_on(context, move |outcome| {
            resolver.complete(outcome.and_then(transform));
        });
        derived
    }

    /// Derive a promise that adopts the state of the promise returned by
    /// `next`, instead of wrapping it.
    pub fn and_then<U, F>(&self, next: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        self.and_then_on(self.context(), next)
    }

    pub fn and_then_on<U, F>(&self, context: ExecutionContext, next: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        let (derived, resolver) = Promise::pending_on(Arc::clone(&context));
        let adopt_on = Arc::clone(&context);
        self.finally_on(context, move |outcome| match outcome {
            Ok(value) => {
                next(value).finally_on(adopt_on, move |inner| {
                    resolver.complete(inner);
                });
            }
            Err(error) => {
                resolver.reject(error);
            }
        });
        derived
    }

    /// Recover from a rejection by switching to the promise returned by
    /// `recover`. Fulfillment passes through untouched.
    pub fn or_else<F>(&self, recover: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Promise<T, E> + Send + 'static,
    {
        self.or_else_on(self.context(), recover)
    }

    pub fn or_else_on<F>(&self, context: ExecutionContext, recover: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Promise<T, E> + Send + 'static,
    {
        let (derived, resolver) = Promise::pending_on(Arc::clone(&context));
        let adopt_on = Arc::clone(&context);
        self.finally_on(context, move |outcome| match outcome {
            Ok(value) => {
                resolver.resolve(value);
            }
            Err(error) => {
                recover(error).finally_on(adopt_on, move |inner| {
                    resolver.complete(inner);
                });
            }
        });
        derived
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Point-in-time snapshot of the state.
    #[must_use]
    pub fn state(&self) -> PromiseState<T, E> {
        self.shared.core.synchronized(|core| core.state.clone())
    }

    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.shared.core.synchronized(|core| core.state.value().cloned())
    }

    #[must_use]
    pub fn error(&self) -> Option<E> {
        self.shared.core.synchronized(|core| core.state.error().cloned())
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.core.synchronized(|core| core.state.is_pending())
    }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.shared
            .core
            .synchronized(|core| core.state.is_fulfilled())
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.shared
            .core
            .synchronized(|core| core.state.is_rejected())
    }

    /// Read-only view with blocking retrieval.
    #[must_use]
    pub fn future(&self) -> Future<T, E> {
        Future::new(self.clone())
    }

    #[cfg(test)]
    fn queued_continuations(&self) -> usize {
        self.shared.core.synchronized(|core| core.continuations.len())
    }
}

impl<T, E> Promise<T, E> {
    /// Default context for continuations registered without one.
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        Arc::clone(&self.shared.context)
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn resolve(&self, value: T) -> bool {
        self.promise.resolve(value)
    }

    pub fn reject(&self, error: E) -> bool {
        self.promise.reject(error)
    }

    /// Settle from a `Result`.
    pub fn complete(&self, outcome: Result<T, E>) -> bool {
        self.promise.settle(outcome)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.promise.is_pending()
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, queued) = self
            .shared
            .core
            .synchronized(|core| (core.state.as_str(), core.continuations.len()));
        f.debug_struct("Promise")
            .field("state", &state)
            .field("continuations", &queued)
            .field("context", &self.shared.context.name())
            .finish()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}
