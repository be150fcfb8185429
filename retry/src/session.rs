//! Session renewal.
//!
//! Operations that fail because the session expired are parked on a paused
//! [`TaskQueue`] while exactly one renewal runs. When it succeeds, the new
//! session is handed to `on_renewed` and the parked operations are replayed
//! once each, in arrival order. When it fails, they are all rejected with the
//! renewal's error.
//!
//! Each parked operation moves through
//! `failed -> pending renewal -> (retried | cancelled with renewal failure)`.
//!
//! Locks are always taken coordinator first, then queue.

use std::fmt;
use std::sync::Arc;

use pledge_core::{CriticalSection, ExecutionContext, Promise, Resolver, background};
use pledge_queue::TaskQueue;
use pledge_types::Error;

type Renew<Tok, E> = Box<dyn Fn() -> Promise<Tok, E> + Send + Sync>;
type NeedsRenewal<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type OnRenewed<Tok, E> = Box<dyn Fn(Result<&Tok, &E>) + Send + Sync>;
type Rejecter<E> = Box<dyn FnOnce(E) + Send>;

struct RenewalState<E> {
    renewing: bool,
    renewals: u64,
    /// Rejecters for operations parked behind the current renewal.
    dependents: Vec<Rejecter<E>>,
}

struct Shared<Tok, E> {
    renew: Renew<Tok, E>,
    needs_renewal: NeedsRenewal<E>,
    on_renewed: Option<OnRenewed<Tok, E>>,
    queue: TaskQueue,
    context: ExecutionContext,
    state: CriticalSection<RenewalState<E>>,
}

/// Coordinates session renewal for operations sharing one session.
///
/// Clones share the same renewal state.
pub struct RenewalCoordinator<Tok, E = Error> {
    shared: Arc<Shared<Tok, E>>,
}

impl<Tok, E> Clone for RenewalCoordinator<Tok, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct RenewalCoordinatorBuilder<Tok, E = Error> {
    renew: Renew<Tok, E>,
    needs_renewal: NeedsRenewal<E>,
    on_renewed: Option<OnRenewed<Tok, E>>,
    context: Option<ExecutionContext>,
    queue: Option<TaskQueue>,
}

impl<Tok, E> RenewalCoordinatorBuilder<Tok, E>
where
    Tok: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Called with the renewal outcome before parked operations are replayed
    /// or rejected. This is where the consumer installs the new session.
    pub fn on_renewed<F>(mut self, on_renewed: F) -> Self
    where
        F: Fn(Result<&Tok, &E>) + Send + Sync + 'static,
    {
        self.on_renewed = Some(Box::new(on_renewed));
        self
    }

    /// Context for continuations and replays. Default: [`background`].
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Queue for parked operations. Default: a new queue on the context.
    pub fn queue(mut self, queue: TaskQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> RenewalCoordinator<Tok, E> {
        let context = self.context.unwrap_or_else(background);
        let queue = self
            .queue
            .unwrap_or_else(|| TaskQueue::on(Arc::clone(&context)));
        RenewalCoordinator {
            shared: Arc::new(Shared {
                renew: self.renew,
                needs_renewal: self.needs_renewal,
                on_renewed: self.on_renewed,
                queue,
                context,
                state: CriticalSection::new(RenewalState {
                    renewing: false,
                    renewals: 0,
                    dependents: Vec::new(),
                }),
            }),
        }
    }
}

impl<Tok, E> RenewalCoordinator<Tok, E>
where
    Tok: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// `renew` starts one session renewal. `needs_renewal` decides which
    /// failures are caused by an expired session.
    pub fn builder<R, N>(renew: R, needs_renewal: N) -> RenewalCoordinatorBuilder<Tok, E>
    where
        R: Fn() -> Promise<Tok, E> + Send + Sync + 'static,
        N: Fn(&E) -> bool + Send + Sync + 'static,
    {
        RenewalCoordinatorBuilder {
            renew: Box::new(renew),
            needs_renewal: Box::new(needs_renewal),
            on_renewed: None,
            context: None,
            queue: None,
        }
    }

    pub fn new<R, N>(renew: R, needs_renewal: N) -> Self
    where
        R: Fn() -> Promise<Tok, E> + Send + Sync + 'static,
        N: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::builder(renew, needs_renewal).build()
    }

    /// Run `operation`. If it fails for lack of a valid session, wait for a
    /// renewal and replay it once; the replay's outcome is final.
    pub fn execute<T, F>(&self, operation: F) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        F: Fn() -> Promise<T, E> + Send + Sync + 'static,
    {
        let (promise, resolver) = Promise::pending_on(Arc::clone(&self.shared.context));
        let operation = Arc::new(operation);
        let shared = Arc::clone(&self.shared);

        let first = operation();
        first.finally_on(Arc::clone(&self.shared.context), move |outcome| {
            match outcome {
                Ok(value) => {
                    resolver.resolve(value);
                }
                Err(error) if !(shared.needs_renewal)(&error) => {
                    resolver.reject(error);
                }
                Err(_) => shared.park(operation, resolver),
            }
        });
        promise
    }

    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.shared.state.synchronized(|state| state.renewing)
    }

    /// Operations parked behind the current renewal.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared
            .state
            .synchronized(|state| state.dependents.len())
    }

    /// Renewals started so far.
    #[must_use]
    pub fn renewals(&self) -> u64 {
        self.shared.state.synchronized(|state| state.renewals)
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }
}

impl<Tok, E> Shared<Tok, E>
where
    Tok: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn park<T, F>(self: &Arc<Self>, operation: Arc<F>, resolver: Resolver<T, E>)
    where
        T: Clone + Send + 'static,
        F: Fn() -> Promise<T, E> + Send + Sync + 'static,
    {
        let rejecter = resolver.clone();
        let context = Arc::clone(&self.context);
        let start_renewal = self.state.synchronized(|state| {
            let start = !state.renewing;
            if start {
                state.renewing = true;
                state.renewals += 1;
                self.queue.pause();
            }
            state.dependents.push(Box::new(move |error| {
                rejecter.reject(error);
            }));
            let handle = self.queue.enqueue(move || {
                tracing::debug!("Replaying operation with renewed session");
                operation().finally_on(context, move |outcome| {
                    resolver.complete(outcome);
                });
            });
            tracing::debug!(
                id = %handle.id(),
                waiting = state.dependents.len(),
                "Operation waiting for session renewal"
            );
            start
        });

        if start_renewal {
            tracing::debug!("Starting session renewal");
            let shared = Arc::clone(self);
            (self.renew)().finally_on(Arc::clone(&self.context), move |outcome| {
                shared.finish_renewal(outcome);
            });
        }
    }

    fn finish_renewal(&self, outcome: Result<Tok, E>) {
        if let Some(on_renewed) = &self.on_renewed {
            on_renewed(outcome.as_ref());
        }

        match outcome {
            Ok(_) => {
                let released = self.state.synchronized(|state| {
                    state.renewing = false;
                    let released = std::mem::take(&mut state.dependents);
                    self.queue.resume();
                    released
                });
                tracing::debug!(replaying = released.len(), "Session renewed");
            }
            Err(error) => {
                let dependents = self.state.synchronized(|state| {
                    state.renewing = false;
                    self.queue.cancel();
                    std::mem::take(&mut state.dependents)
                });
                tracing::warn!(
                    cancelled = dependents.len(),
                    "Session renewal failed; rejecting waiting operations"
                );
                for reject in dependents {
                    reject(error.clone());
                }
            }
        }
    }
}

impl<Tok, E> fmt::Debug for RenewalCoordinator<Tok, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (renewing, renewals, waiting) = self.shared.state.synchronized(|state| {
            (state.renewing, state.renewals, state.dependents.len())
        });
        f.debug_struct("RenewalCoordinator")
            .field("renewing", &renewing)
            .field("renewals", &renewals)
            .field("waiting", &waiting)
            .field("queue", &self.shared.queue)
            .finish_non_exhaustive()
    }
}
