use std::sync::Arc;

use pledge_core::{ExecutionContext, Promise, Resolver, background};

use crate::policy::{RetryPolicy, calculate_retry_delay};

/// Invoke `operation` until one of its promises fulfills, making at most
/// `attempts` attempts in total. Rejects with the last error once attempts
/// run out. `attempts == 0` behaves like `1`.
pub fn retry<T, E, F>(attempts: u32, operation: F) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn() -> Promise<T, E> + Send + Sync + 'static,
{
    let policy = RetryPolicy::immediate(attempts.max(1) - 1);
    retry_with(&policy, background(), |_| true, operation)
}

/// Invoke `operation` under `policy`, backing off on `context` between
/// attempts. Errors for which `should_retry` returns `false` reject
/// immediately.
pub fn retry_with<T, E, F, P>(
    policy: &RetryPolicy,
    context: ExecutionContext,
    should_retry: P,
    operation: F,
) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn() -> Promise<T, E> + Send + Sync + 'static,
    P: Fn(&E) -> bool + Send + Sync + 'static,
{
    let (promise, resolver) = Promise::pending_on(Arc::clone(&context));
    Arc::new(Attempt {
        policy: policy.clone(),
        context,
        should_retry,
        operation,
        resolver,
    })
    .run(0);
    promise
}

struct Attempt<T, E, F, P> {
    policy: RetryPolicy,
    context: ExecutionContext,
    should_retry: P,
    operation: F,
    resolver: Resolver<T, E>,
}

impl<T, E, F, P> Attempt<T, E, F, P>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn() -> Promise<T, E> + Send + Sync + 'static,
    P: Fn(&E) -> bool + Send + Sync + 'static,
{
    /// `retry_count` is 0 for the first attempt, 1+ for retries.
    fn run(self: Arc<Self>, retry_count: u32) {
        let context = Arc::clone(&self.context);
        let pending = (self.operation)();
        pending.finally_on(context, move |outcome| self.settled(retry_count, outcome));
    }

    fn settled(self: Arc<Self>, retry_count: u32, outcome: Result<T, E>) {
        let error = match outcome {
            Ok(value) => {
                self.resolver.resolve(value);
                return;
            }
            Err(error) => error,
        };

        if retry_count >= self.policy.max_retries || !(self.should_retry)(&error) {
            tracing::debug!(attempts = retry_count + 1, "Operation failed; not retrying");
            self.resolver.reject(error);
            return;
        }

        let delay = calculate_retry_delay(retry_count, &self.policy);
        tracing::debug!(
            retry_count = retry_count + 1,
            delay_ms = delay.as_millis(),
            "Retrying operation after failure"
        );
        let context = Arc::clone(&self.context);
        context.execute_after(delay, Box::new(move || self.run(retry_count + 1)));
    }
}
