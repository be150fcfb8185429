//! Session renewal coordination tests

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pledge_core::{Error, Future, Promise, PromiseState};
use pledge_retry::RenewalCoordinator;
use pretty_assertions::assert_eq;

use crate::common::{TIMEOUT, wait_until};

const EXPIRED: &str = "session expired";

/// Token store shared by the simulated client and its renewal hook.
#[derive(Clone, Default)]
struct Tokens {
    current: Arc<Mutex<Option<u32>>>,
    issued: Arc<AtomicU32>,
}

impl Tokens {
    fn coordinator(&self, renewal_delay: Duration, fail: bool) -> RenewalCoordinator<u32> {
        let issued = Arc::clone(&self.issued);
        let current = Arc::clone(&self.current);
        RenewalCoordinator::builder(
            move || {
                let issued = Arc::clone(&issued);
                Promise::new(move |resolver| {
                    thread::sleep(renewal_delay);
                    if fail {
                        return Err(Error::message("refresh token revoked"));
                    }
                    resolver.resolve(issued.fetch_add(1, Ordering::SeqCst) + 1);
                    Ok(())
                })
            },
            |error: &Error| error.to_string() == EXPIRED,
        )
        .on_renewed(move |outcome| {
            if let Ok(token) = outcome {
                *current.lock().unwrap() = Some(*token);
            }
        })
        .build()
    }

    fn request(&self, calls: &Arc<AtomicUsize>) -> impl Fn() -> Promise<u32> + use<> {
        let current = Arc::clone(&self.current);
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            match *current.lock().unwrap() {
                Some(token) => Promise::resolved(token),
                None => Promise::rejected(Error::message(EXPIRED)),
            }
        }
    }
}

#[test]
fn expired_requests_wait_for_a_single_renewal() {
    let tokens = Tokens::default();
    let coordinator = tokens.coordinator(Duration::from_millis(200), false);
    let calls = Arc::new(AtomicUsize::new(0));

    let futures: Vec<Future<u32>> = (0..6)
        .map(|_| coordinator.execute(tokens.request(&calls)).future())
        .collect();

    for future in &futures {
        assert_eq!(future.wait_timeout(TIMEOUT), PromiseState::Fulfilled(1));
    }
    assert_eq!(coordinator.renewals(), 1);
    assert_eq!(tokens.issued.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert!(!coordinator.is_renewing());
}

#[test]
fn renewal_failure_rejects_waiting_requests_without_replay() {
    let tokens = Tokens::default();
    let coordinator = tokens.coordinator(Duration::from_millis(200), true);
    let calls = Arc::new(AtomicUsize::new(0));

    let futures: Vec<Future<u32>> = (0..4)
        .map(|_| coordinator.execute(tokens.request(&calls)).future())
        .collect();
    wait_until(|| coordinator.waiting() == 4);

    for future in &futures {
        assert_eq!(
            future.wait_timeout(TIMEOUT),
            PromiseState::Rejected(Error::message("refresh token revoked"))
        );
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(coordinator.waiting(), 0);
    assert!(coordinator.queue().is_empty());
}

#[test]
fn requests_with_valid_session_never_wait() {
    let tokens = Tokens::default();
    *tokens.current.lock().unwrap() = Some(7);
    let coordinator = tokens.coordinator(Duration::from_millis(1), false);
    let calls = Arc::new(AtomicUsize::new(0));

    let result = coordinator
        .execute(tokens.request(&calls))
        .future()
        .wait_timeout(TIMEOUT);

    assert_eq!(result, PromiseState::Fulfilled(7));
    assert_eq!(coordinator.renewals(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
