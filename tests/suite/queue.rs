//! Task queue pause, resume, and cancellation tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use pledge_core::{ExecutionContext, Promise, WorkStatus};
use pledge_queue::TaskQueue;
use pretty_assertions::assert_eq;

use crate::common::{TIMEOUT, drain, serial, wait_until};

/// Occupy a serial context until the returned sender fires.
fn block(context: &ExecutionContext) -> mpsc::Sender<()> {
    let (release, blocked) = mpsc::channel();
    context.execute(Box::new(move || {
        let _ = blocked.recv_timeout(TIMEOUT);
    }));
    release
}

fn counting(queue: &TaskQueue, ran: &Arc<AtomicUsize>, count: usize) {
    for _ in 0..count {
        let ran = Arc::clone(ran);
        queue.enqueue(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }
}

#[test]
fn scenario_pause_right_after_enqueue() {
    let context = serial("suite-queue-pause");
    let queue = TaskQueue::on(context.clone());
    let ran = Arc::new(AtomicUsize::new(0));
    let release = block(&context);

    counting(&queue, &ran, 3);
    assert!(queue.pause());
    release.send(()).unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(queue.held(), 3);
    assert_eq!(queue.len(), 3);

    assert!(queue.resume());
    wait_until(|| ran.load(Ordering::SeqCst) == 3);
    drain(&context);
    assert!(queue.is_empty());
}

#[test]
fn cancel_discards_ten_paused_items() {
    let context = serial("suite-queue-cancel-ten");
    let queue = TaskQueue::on(context.clone());
    let ran = Arc::new(AtomicUsize::new(0));
    let release = block(&context);

    queue.pause();
    counting(&queue, &ran, 10);
    queue.resume();
    queue.pause();

    assert_eq!(queue.cancel(), 10);
    assert_eq!(queue.len(), 0);
    assert!(!queue.is_paused());

    release.send(()).unwrap();
    drain(&context);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_discards_ten_dispatched_items() {
    let context = serial("suite-queue-cancel-dispatched");
    let queue = TaskQueue::on(context.clone());
    let ran = Arc::new(AtomicUsize::new(0));
    let release = block(&context);

    counting(&queue, &ran, 10);
    assert_eq!(queue.cancel(), 10);
    assert_eq!(queue.len(), 0);

    release.send(()).unwrap();
    drain(&context);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn scenario_cancel_while_paused() {
    let context = serial("suite-queue-cancel");
    let queue = TaskQueue::on(context.clone());
    let ran = Arc::new(AtomicUsize::new(0));

    queue.pause();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let ran = Arc::clone(&ran);
            queue.enqueue(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    assert_eq!(queue.cancel(), 3);
    assert_eq!(queue.len(), 0);
    queue.resume();
    drain(&context);

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    for handle in &handles {
        assert_eq!(handle.status(), WorkStatus::Cancelled);
    }
}

#[test]
fn queue_is_reusable_after_cancel() {
    let context = serial("suite-queue-reuse");
    let queue = TaskQueue::on(context.clone());
    queue.pause();
    queue.enqueue(|| panic!("cancelled work must not run"));
    queue.cancel();

    let (promise, resolver) = Promise::<u32>::pending();
    queue.enqueue(move || {
        resolver.resolve(1);
    });

    assert_eq!(promise.future().wait_timeout(TIMEOUT).value(), Some(&1));
    assert!(!queue.is_paused());
}

#[test]
fn resume_preserves_arrival_order_across_pauses() {
    let context = serial("suite-queue-order");
    let queue = TaskQueue::on(context.clone());
    let order = Arc::new(Mutex::new(Vec::new()));

    let push = |label: &'static str| {
        let order = Arc::clone(&order);
        queue.enqueue(move || order.lock().unwrap().push(label));
    };

    queue.pause();
    push("a");
    push("b");
    queue.resume();
    queue.pause();
    push("c");
    queue.resume();
    drain(&context);
    drain(&context);

    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    assert!(queue.is_empty());
}

#[test]
fn work_can_settle_promises() {
    let queue = TaskQueue::new();
    let futures: Vec<_> = (0..10u32)
        .map(|i| {
            let (promise, resolver) = Promise::<u32>::pending();
            queue.enqueue(move || {
                resolver.resolve(i * i);
            });
            promise.future()
        })
        .collect();

    let squares: Vec<_> = futures.iter().map(|f| f.wait().unwrap()).collect();
    assert_eq!(squares, (0..10u32).map(|i| i * i).collect::<Vec<_>>());
}
