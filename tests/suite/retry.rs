//! Retry combinator tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pledge_core::{Error, Promise, PromiseState, background};
use pledge_retry::{RetryPolicy, retry, retry_with};
use pretty_assertions::assert_eq;

use crate::common::TIMEOUT;

fn counting(calls: &Arc<AtomicU32>, fail_until: u32) -> impl Fn() -> Promise<u32> + use<> {
    let calls = Arc::clone(calls);
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= fail_until {
            Promise::rejected(Error::message(format!("failure {call}")))
        } else {
            Promise::resolved(call)
        }
    }
}

#[test]
fn retry_stops_at_first_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let state = retry(4, counting(&calls, 1)).future().wait_timeout(TIMEOUT);

    assert_eq!(state, PromiseState::Fulfilled(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn retry_reports_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let state = retry(2, counting(&calls, 5)).future().wait_timeout(TIMEOUT);

    assert_eq!(state, PromiseState::Rejected(Error::message("failure 2")));
}

#[test]
fn predicate_limits_which_errors_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy {
        max_retries: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter_factor: 0.25,
    };
    let state = retry_with(
        &policy,
        background(),
        |error: &Error| error.to_string() != "failure 2",
        counting(&calls, 10),
    )
    .future()
    .wait_timeout(TIMEOUT);

    assert_eq!(state, PromiseState::Rejected(Error::message("failure 2")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
