//! Promise settlement, ordering, and derived-promise tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use pledge_core::{Error, Promise, PromiseState};
use pretty_assertions::assert_eq;

use crate::common::{TIMEOUT, delayed, drain, serial, wait_until};

#[test]
fn scenario_resolve_then_map() {
    let promise: Promise<i32> = Promise::new(|resolver| {
        resolver.resolve(42);
        Ok(())
    });
    let doubled = promise.map(|value| value * 2).future();

    assert_eq!(doubled.wait_timeout(TIMEOUT), PromiseState::Fulfilled(84));
}

#[test]
fn scenario_reject_then_catch() {
    let promise: Promise<i32> = Promise::new(|resolver| {
        resolver.reject(Error::message("boom"));
        Ok(())
    });
    let caught = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&caught);
    let derived = promise.map(|value| value);
    derived.catch(move |error| *slot.lock().unwrap() = Some(error.to_string()));

    assert_eq!(derived.future().wait(), Err(Error::message("boom")));
    wait_until(|| caught.lock().unwrap().is_some());
    assert_eq!(caught.lock().unwrap().as_deref(), Some("boom"));
}

#[test]
fn racing_producers_settle_once() {
    for _ in 0..20 {
        let (promise, resolver) = Promise::<u32>::pending();
        let barrier = Arc::new(Barrier::new(8));
        let wins = Arc::new(AtomicUsize::new(0));

        let racers: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                let barrier = Arc::clone(&barrier);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    barrier.wait();
                    if resolver.resolve(i) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for racer in racers {
            racer.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(promise.is_fulfilled());
        assert!(!resolver.is_pending());
    }
}

#[test]
fn continuations_run_in_registration_order_on_serial_context() {
    let context = serial("suite-fifo");
    let (promise, resolver) = Promise::<u32>::pending_on(context.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..10 {
        let seen = Arc::clone(&seen);
        promise.then(move |value| seen.lock().unwrap().push((i, value)));
    }
    resolver.resolve(5);
    drain(&context);

    let expected: Vec<_> = (0..10).map(|i| (i, 5)).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[test]
fn rejection_flows_through_a_chain() {
    let transforms = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&transforms);

    let chained = Promise::<u32>::rejected(Error::message("root cause"))
        .map(move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            value + 1
        })
        .map(|value| value.to_string())
        .and_then(|text| Promise::resolved(text.len()));

    assert_eq!(chained.future().wait(), Err(Error::message("root cause")));
    assert_eq!(transforms.load(Ordering::SeqCst), 0);
}

#[test]
fn chain_hops_between_contexts() {
    let first = serial("suite-hop-a");
    let second = serial("suite-hop-b");
    let names = Arc::new(Mutex::new(Vec::new()));

    let a = Arc::clone(&names);
    let b = Arc::clone(&names);
    let result = delayed(Duration::from_millis(10), 1)
        .map_on(first, move |value| {
            a.lock().unwrap().push(thread::current().name().map(str::to_string));
            value + 1
        })
        .map_on(second, move |value| {
            b.lock().unwrap().push(thread::current().name().map(str::to_string));
            value * 10
        })
        .future()
        .wait();

    assert_eq!(result, Ok(20));
    assert_eq!(
        *names.lock().unwrap(),
        vec![
            Some("suite-hop-a".to_string()),
            Some("suite-hop-b".to_string())
        ]
    );
}

#[test]
fn or_else_retries_once_with_recovery() {
    let recovered = Promise::<String>::rejected(Error::message("stale"))
        .or_else(|_| delayed(Duration::from_millis(10), "fresh".to_string()));

    assert_eq!(recovered.future().wait(), Ok("fresh".to_string()));
}

#[test]
fn subscribe_invokes_exactly_one_handler() {
    let fulfilled = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let promise = delayed(Duration::from_millis(10), 3u8);

    let (f, r) = (Arc::clone(&fulfilled), Arc::clone(&rejected));
    promise.subscribe(
        move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        },
        move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        },
    );
    promise.reject(Error::Cancelled);

    let settled = || fulfilled.load(Ordering::SeqCst) + rejected.load(Ordering::SeqCst);
    wait_until(|| settled() == 1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(settled(), 1);
}
