//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use pledge_core::{ExecutionContext, Promise, SerialQueue};

/// Generous bound for anything that should happen "soon".
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A fresh single-threaded context, for tests that assert ordering.
pub fn serial(name: &str) -> ExecutionContext {
    SerialQueue::new(name)
        .expect("serial queue thread starts")
        .into_context()
}

/// Block until `condition` holds, failing the test after [`TIMEOUT`].
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Block until every job submitted to `context` so far has run.
/// Only meaningful for serial contexts.
pub fn drain(context: &ExecutionContext) {
    let (tx, rx) = mpsc::channel();
    context.execute(Box::new(move || {
        let _ = tx.send(());
    }));
    rx.recv_timeout(TIMEOUT).expect("context drained in time");
}

/// A promise settled from another thread after `delay`.
pub fn delayed<T>(delay: Duration, value: T) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let (promise, resolver) = Promise::pending();
    thread::spawn(move || {
        thread::sleep(delay);
        resolver.resolve(value);
    });
    promise
}
