// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end behavior of `ComputedDiff`.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use understory_reactive::{
    AtomicProperty, ComputedDiff, DiffProperty, ExecutorWorker, InPlaceWorker, ListenerId,
    MutableProperty, Property, SerialExecutor, SyncProperty, Worker,
};

type Triples = Arc<Mutex<Vec<(i64, i64, i64)>>>;

fn subtract(old: &i64, new: &i64) -> i64 {
    new - old
}

fn record(prop: &ComputedDiff<i64, i64>) -> (ListenerId, Triples) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let id = prop.add_diff_listener(move |o, n, d| sink.lock().unwrap().push((*o, *n, *d)));
    (id, log)
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for the pipeline");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn subscribe_unsubscribe_resubscribe() {
    let source = Arc::new(AtomicProperty::new(10_i64));
    let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);

    let (id, first) = record(&prop);
    source.set(100);
    assert_eq!(*first.lock().unwrap(), vec![(10, 100, 90)]);

    assert!(prop.remove_change_listener(id));
    source.set(200);
    assert_eq!(first.lock().unwrap().len(), 1);

    let (_, second) = record(&prop);
    assert_eq!(prop.value(), 200);
    source.set(250);
    assert_eq!(*second.lock().unwrap(), vec![(200, 250, 50)]);
    assert_eq!(first.lock().unwrap().len(), 1);
}

#[test]
fn change_and_diff_listeners_see_identical_transitions() {
    let source = Arc::new(AtomicProperty::new(0_i64));
    let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
    let (_, diffs) = record(&prop);
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    prop.add_change_listener(move |o: &i64, n: &i64| sink.lock().unwrap().push((*o, *n)));

    for v in [3, 7, 7, 12] {
        source.set(v);
    }

    let diffs = diffs.lock().unwrap();
    let changes = changes.lock().unwrap();
    assert_eq!(*diffs, vec![(0, 3, 3), (3, 7, 4), (7, 12, 5)]);
    let stripped: Vec<_> = diffs.iter().map(|&(o, n, _)| (o, n)).collect();
    assert_eq!(*changes, stripped);
}

fn sum_of_diffs_matches_total(worker: Arc<dyn Worker>) {
    const THREADS: usize = 6;
    const INCREMENTS: usize = 400;
    let total = i64::try_from(THREADS * INCREMENTS).unwrap();

    let source = Arc::new(AtomicProperty::new(0_i64));
    let prop = ComputedDiff::new(source.clone(), worker, subtract);
    let (_, log) = record(&prop);

    let barrier = Arc::new(Barrier::new(THREADS));
    let writers: Vec<_> = (0..THREADS)
        .map(|_| {
            let source = source.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..INCREMENTS {
                    source.update(|v| v + 1);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    assert_eq!(source.value(), total);

    wait_until(|| prop.value() == total && !prop.is_computing());

    let log = log.lock().unwrap();
    let sum: i64 = log.iter().map(|&(_, _, d)| d).sum();
    assert_eq!(sum, total);
    let mut expected_old = 0;
    for &(old, new, diff) in log.iter() {
        assert_eq!(old, expected_old, "published pairs must chain");
        assert_eq!(diff, new - old);
        expected_old = new;
    }
}

#[test]
fn no_lost_diffs_in_place() {
    sum_of_diffs_matches_total(Arc::new(InPlaceWorker));
}

#[test]
fn no_lost_diffs_on_background_worker() {
    let executor = Arc::new(SerialExecutor::builder().name("diff-worker").spawn().unwrap());
    sum_of_diffs_matches_total(Arc::new(ExecutorWorker::new(executor)));
}

#[test]
fn chained_computed_diffs() {
    let source = Arc::new(AtomicProperty::new(1_i64));
    let inner = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
    let outer = ComputedDiff::new(
        inner.clone(),
        Arc::new(InPlaceWorker),
        |o: &i64, n: &i64| n * 10 - o * 10,
    );
    let (_, log) = record(&outer);
    assert_eq!(source.listener_count(), 1);

    source.set(4);
    assert_eq!(*log.lock().unwrap(), vec![(1, 4, 30)]);
}
