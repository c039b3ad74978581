// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Properties that publish a diff with each transition.
//!
//! [`AtomicDiffProperty`] lets the writer supply the diff. [`ComputedDiff`]
//! derives it from an upstream property in two phases: the `(old, new)` pair
//! is captured from upstream, the diff is computed on a [`Worker`], and the
//! result is published to change and diff listeners alike.
//!
//! ## Coalescing
//!
//! A `ComputedDiff` runs at most one computation at a time. Upstream changes
//! arriving while one is in flight only replace the pending target. When the
//! computation finishes its result is published, and the next computation
//! diffs the last published value against the pending target. Intermediate
//! upstream values may therefore be skipped, but published pairs always
//! chain.
//!
//! ## Observed state
//!
//! A `ComputedDiff` only listens to upstream while it has listeners itself.
//! When the last listener is removed the upstream listener is removed too, the
//! in-flight computation is cancelled, and its result is discarded should it
//! still arrive. The next listener restarts the pipeline from the upstream
//! value at that time; changes made while unobserved are not replayed.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::executor::Executor;
use crate::listener::ListenerId;
use crate::notifier::{Callback, Notifier, Outcome, Step};
use crate::panic::{PanicHandler, PanicOrigin, PanicPayload, default_handler};
use crate::property::{ChangeListener, DiffListener, DiffProperty, Property, SyncProperty};
use crate::worker::{WorkHandle, Worker, WorkerExt};

fn change_callback<T, D>(listener: ChangeListener<T>) -> Callback<T, Arc<D>> {
    Callback::Change(listener)
}

fn diff_callback<T, D>(listener: DiffListener<T, D>) -> Callback<T, Arc<D>>
where
    T: 'static,
    D: 'static,
{
    Callback::Diff(Box::new(move |old: &T, new: &T, diff: &Arc<D>| {
        listener(old, new, &**diff);
    }))
}

/// A concurrent mutable property whose writers supply the diff.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use understory_reactive::{AtomicDiffProperty, DiffProperty, Property};
///
/// let items = AtomicDiffProperty::new(vec![1, 2]);
/// let added = Arc::new(Mutex::new(Vec::new()));
/// let sink = added.clone();
/// items.add_diff_listener(move |_old, _new, diff: &Vec<i32>| {
///     sink.lock().unwrap().extend_from_slice(diff);
/// });
/// items.set(vec![1, 2, 3], vec![3]);
/// assert_eq!(items.value(), vec![1, 2, 3]);
/// assert_eq!(*added.lock().unwrap(), vec![3]);
/// ```
pub struct AtomicDiffProperty<T, D> {
    notifier: Notifier<T, Arc<D>>,
}

impl<T, D> AtomicDiffProperty<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Creates a property whose listener panics are logged.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_panic_handler(value, default_handler())
    }

    /// Creates a property reporting listener panics to `handler`.
    #[must_use]
    pub fn with_panic_handler(value: T, handler: Arc<dyn PanicHandler>) -> Self {
        Self {
            notifier: Notifier::new(value, handler),
        }
    }

    /// Stores `value`, publishing `diff` as the description of the change.
    ///
    /// Writing a value equal to the current one does nothing and drops `diff`.
    pub fn set(&self, value: T, diff: D) {
        let diff = Arc::new(diff);
        self.notifier.transition(|current| {
            if *current == value {
                Step::Keep
            } else {
                Step::Install(value.clone(), Arc::clone(&diff))
            }
        });
    }

    /// Stores `new` with `diff` if the current value equals `expected`.
    pub fn compare_and_set(&self, expected: &T, new: T, diff: D) -> bool {
        let diff = Arc::new(diff);
        let outcome = self.notifier.transition(|current| {
            if current != expected {
                Step::Abort
            } else if *current == new {
                Step::Keep
            } else {
                Step::Install(new.clone(), Arc::clone(&diff))
            }
        });
        !matches!(outcome, Outcome::Aborted)
    }

    /// Number of registered listeners of either kind.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }
}

impl<T, D> Property<T> for AtomicDiffProperty<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn value(&self) -> T {
        self.notifier.value()
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.notifier.remove(id)
    }
}

impl<T, D> SyncProperty<T> for AtomicDiffProperty<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn add_boxed_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<T>,
    ) -> ListenerId {
        self.notifier.add(executor, change_callback(listener))
    }
}

impl<T, D> DiffProperty<T, D> for AtomicDiffProperty<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn add_boxed_diff_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: DiffListener<T, D>,
    ) -> ListenerId {
        self.notifier.add(executor, diff_callback(listener))
    }
}

impl<T: fmt::Debug, D> fmt::Debug for AtomicDiffProperty<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicDiffProperty")
            .field("notifier", &self.notifier)
            .finish()
    }
}

type DiffFn<T, D> = dyn Fn(&T, &T) -> D + Send + Sync;

/// Upstream subscription and in-flight work of a worker-backed property.
pub(crate) struct Pipeline<T> {
    pub(crate) upstream: Option<ListenerId>,
    pub(crate) in_flight: Option<WorkHandle>,
    pub(crate) latest: Option<T>,
}

impl<T> Pipeline<T> {
    pub(crate) const fn new() -> Self {
        Self {
            upstream: None,
            in_flight: None,
            latest: None,
        }
    }
}

/// A diff property derived from an upstream property.
///
/// See the [module documentation](self) for the coalescing and observed-state
/// rules.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use understory_reactive::{
///     AtomicProperty, ComputedDiff, DiffProperty, InPlaceWorker, MutableProperty,
/// };
///
/// let source = Arc::new(AtomicProperty::new(10_i64));
/// let diffs = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), |old: &i64, new: &i64| {
///     new - old
/// });
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// diffs.add_diff_listener(move |old, new, diff| sink.lock().unwrap().push((*old, *new, *diff)));
///
/// source.set(100);
/// assert_eq!(*seen.lock().unwrap(), vec![(10, 100, 90)]);
/// ```
pub struct ComputedDiff<T, D> {
    source: Arc<dyn SyncProperty<T>>,
    diff: Arc<DiffFn<T, D>>,
    worker: Arc<dyn Worker>,
    notifier: Notifier<T, Arc<D>>,
    /// Bumped whenever the upstream subscription starts or stops; results of
    /// computations started under an older epoch are discarded.
    epoch: AtomicU64,
    pipeline: Mutex<Pipeline<T>>,
    this: Weak<Self>,
}

impl<T, D> ComputedDiff<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Creates a diff property over `source`.
    ///
    /// `diff` must be pure; it runs on `worker`. Listener and diff panics are
    /// logged.
    pub fn new<P, F>(source: Arc<P>, worker: Arc<dyn Worker>, diff: F) -> Arc<Self>
    where
        P: SyncProperty<T> + 'static,
        F: Fn(&T, &T) -> D + Send + Sync + 'static,
    {
        Self::with_panic_handler(source, worker, diff, default_handler())
    }

    /// Like [`new`](Self::new), reporting panics to `handler`.
    pub fn with_panic_handler<P, F>(
        source: Arc<P>,
        worker: Arc<dyn Worker>,
        diff: F,
        handler: Arc<dyn PanicHandler>,
    ) -> Arc<Self>
    where
        P: SyncProperty<T> + 'static,
        F: Fn(&T, &T) -> D + Send + Sync + 'static,
    {
        let initial = source.value();
        Arc::new_cyclic(|this| Self {
            source,
            diff: Arc::new(diff),
            worker,
            notifier: Notifier::new(initial, handler),
            epoch: AtomicU64::new(0),
            pipeline: Mutex::new(Pipeline::new()),
            this: this.clone(),
        })
    }

    /// Returns `true` while at least one listener is registered.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.notifier.listener_count() > 0
    }

    /// Returns `true` while a diff computation is running or queued.
    #[must_use]
    pub fn is_computing(&self) -> bool {
        self.pipeline.lock().in_flight.is_some()
    }

    fn register(
        &self,
        executor: Option<Arc<dyn Executor>>,
        callback: Callback<T, Arc<D>>,
    ) -> ListenerId {
        let (id, catch_up) = {
            let mut pipeline = self.pipeline.lock();
            let catch_up = if pipeline.upstream.is_none() {
                self.attach(&mut pipeline)
            } else {
                None
            };
            (self.notifier.add(executor, callback), catch_up)
        };
        if let Some((epoch, handle, target)) = catch_up {
            self.start(epoch, handle, target);
        }
        id
    }

    /// Subscribes upstream. Returns the computation to start once the lock is
    /// released if upstream moved while the subscription was being made.
    fn attach(&self, pipeline: &mut Pipeline<T>) -> Option<(u64, WorkHandle, T)> {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        pipeline.latest = None;
        pipeline.in_flight = None;
        let base = self.source.value();
        self.notifier.reset(base.clone());
        let this = self.this.clone();
        let id = self.source.add_boxed_listener(
            None,
            Box::new(move |_old: &T, new: &T| {
                if let Some(this) = this.upgrade() {
                    this.on_upstream(epoch, new.clone());
                }
            }),
        );
        pipeline.upstream = Some(id);
        tracing::debug!(epoch, "diff property attached to upstream");

        let current = self.source.value();
        if current == base {
            return None;
        }
        tracing::debug!("upstream changed while attaching");
        let handle = WorkHandle::new();
        pipeline.in_flight = Some(handle.clone());
        Some((epoch, handle, current))
    }

    fn detach(&self, pipeline: &mut Pipeline<T>) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(id) = pipeline.upstream.take() {
            self.source.remove_change_listener(id);
        }
        pipeline.latest = None;
        if let Some(handle) = pipeline.in_flight.take() {
            self.worker.cancel(&handle);
            tracing::debug!("cancelled in-flight diff computation");
        }
        tracing::debug!("diff property detached from upstream");
    }

    fn on_upstream(&self, epoch: u64, target: T) {
        let handle = {
            let mut pipeline = self.pipeline.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            if pipeline.in_flight.is_some() {
                if pipeline.latest.replace(target).is_some() {
                    tracing::trace!("coalesced intermediate upstream value");
                }
                return;
            }
            let handle = WorkHandle::new();
            pipeline.in_flight = Some(handle.clone());
            handle
        };
        self.start(epoch, handle, target);
    }

    fn start(&self, epoch: u64, handle: WorkHandle, target: T) {
        let base = self.notifier.value();
        if base == target {
            self.advance(epoch);
            return;
        }
        let diff = Arc::clone(&self.diff);
        let this = self.this.clone();
        self.worker.map_with(
            &handle,
            (base, target),
            move |(base, target)| {
                let result = catch_unwind(AssertUnwindSafe(|| diff(&base, &target)));
                (base, target, result)
            },
            move |(base, target, result)| {
                if let Some(this) = this.upgrade() {
                    this.complete(epoch, base, target, result);
                }
            },
        );
    }

    fn complete(&self, epoch: u64, base: T, target: T, result: Result<D, PanicPayload>) {
        match result {
            Ok(diff) => {
                let diff = Arc::new(diff);
                let outcome = self.notifier.transition(|current| {
                    if self.epoch.load(Ordering::Acquire) != epoch || *current != base {
                        Step::Abort
                    } else {
                        Step::Install(target.clone(), Arc::clone(&diff))
                    }
                });
                if matches!(outcome, Outcome::Aborted) {
                    tracing::debug!("discarded diff result of a stale computation");
                    return;
                }
            }
            Err(payload) => {
                self.notifier
                    .panics()
                    .handle(PanicOrigin::DiffComputation, payload);
            }
        }
        self.advance(epoch);
    }

    /// Starts the computation for the pending target, if any.
    fn advance(&self, epoch: u64) {
        let next = {
            let mut pipeline = self.pipeline.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            match pipeline.latest.take() {
                Some(latest) => {
                    let handle = WorkHandle::new();
                    pipeline.in_flight = Some(handle.clone());
                    Some((handle, latest))
                }
                None => {
                    pipeline.in_flight = None;
                    None
                }
            }
        };
        if let Some((handle, latest)) = next {
            self.start(epoch, handle, latest);
        }
    }
}

impl<T, D> Property<T> for ComputedDiff<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// The last published value while observed, the upstream value otherwise.
    fn value(&self) -> T {
        if self.is_observed() {
            self.notifier.value()
        } else {
            self.source.value()
        }
    }

    fn may_change(&self) -> bool {
        self.source.may_change()
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        let mut pipeline = self.pipeline.lock();
        let removed = self.notifier.remove(id);
        if removed && self.notifier.listener_count() == 0 && pipeline.upstream.is_some() {
            self.detach(&mut pipeline);
        }
        removed
    }
}

impl<T, D> SyncProperty<T> for ComputedDiff<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn add_boxed_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<T>,
    ) -> ListenerId {
        self.register(executor, change_callback(listener))
    }
}

impl<T, D> DiffProperty<T, D> for ComputedDiff<T, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn add_boxed_diff_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: DiffListener<T, D>,
    ) -> ListenerId {
        self.register(executor, diff_callback(listener))
    }
}

impl<T, D> Drop for ComputedDiff<T, D> {
    fn drop(&mut self) {
        if let Some(id) = self.pipeline.get_mut().upstream.take() {
            self.source.remove_change_listener(id);
        }
    }
}

impl<T: fmt::Debug, D> fmt::Debug for ComputedDiff<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pipeline = self.pipeline.lock();
        f.debug_struct("ComputedDiff")
            .field("published", &self.notifier)
            .field("attached", &pipeline.upstream.is_some())
            .field("computing", &pipeline.in_flight.is_some())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::AtomicProperty;
    use crate::executor::ManualExecutor;
    use crate::panic::CollectPanics;
    use crate::property::MutableProperty;
    use crate::worker::{ExecutorWorker, InPlaceWorker};

    type Log = Arc<Mutex<Vec<(i64, i64, i64)>>>;

    fn subtract(old: &i64, new: &i64) -> i64 {
        new - old
    }

    fn listen(prop: &ComputedDiff<i64, i64>) -> (ListenerId, Log) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let id = prop.add_diff_listener(move |o, n, d| sink.lock().push((*o, *n, *d)));
        (id, log)
    }

    #[test]
    fn writer_supplied_diff_reaches_both_listener_kinds() {
        let prop = AtomicDiffProperty::new(1_i64);
        let changes = Arc::new(Mutex::new(Vec::new()));
        let diffs = Arc::new(Mutex::new(Vec::new()));
        let c = changes.clone();
        let d = diffs.clone();
        prop.add_change_listener(move |o, n| c.lock().push((*o, *n)));
        prop.add_diff_listener(move |o, n, diff: &String| d.lock().push((*o, *n, diff.clone())));
        prop.set(2, "+1".to_owned());
        assert!(!prop.compare_and_set(&1, 3, "bad".to_owned()));
        assert!(prop.compare_and_set(&2, 4, "+2".to_owned()));
        assert_eq!(*changes.lock(), vec![(1, 2), (2, 4)]);
        assert_eq!(
            *diffs.lock(),
            vec![(1, 2, "+1".to_owned()), (2, 4, "+2".to_owned())]
        );
    }

    #[test]
    fn subscription_follows_observed_state() {
        let source = Arc::new(AtomicProperty::new(0_i64));
        let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
        assert!(!prop.is_observed());
        assert_eq!(source.listener_count(), 0);

        let (a, _) = listen(&prop);
        let (b, _) = listen(&prop);
        assert_eq!(source.listener_count(), 1);
        assert!(prop.remove_change_listener(a));
        assert_eq!(source.listener_count(), 1);
        assert!(prop.remove_change_listener(b));
        assert_eq!(source.listener_count(), 0);
        assert!(!prop.remove_change_listener(b));
    }

    #[test]
    fn unobserved_value_reads_through_to_source() {
        let source = Arc::new(AtomicProperty::new(3_i64));
        let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
        source.set(8);
        assert_eq!(prop.value(), 8);
    }

    #[test]
    fn in_flight_changes_coalesce_to_latest() {
        let executor = Arc::new(ManualExecutor::new());
        let source = Arc::new(AtomicProperty::new(0_i64));
        let prop = ComputedDiff::new(
            source.clone(),
            Arc::new(ExecutorWorker::new(executor.clone())),
            subtract,
        );
        let (_, log) = listen(&prop);

        source.set(1);
        source.set(2);
        source.set(3);
        assert!(prop.is_computing());
        assert_eq!(prop.value(), 0);

        executor.run_pending();
        assert_eq!(*log.lock(), vec![(0, 1, 1), (1, 3, 2)]);
        assert!(!prop.is_computing());
        assert_eq!(prop.value(), 3);
    }

    #[test]
    fn detach_cancels_and_discards_in_flight_work() {
        let executor = Arc::new(ManualExecutor::new());
        let source = Arc::new(AtomicProperty::new(0_i64));
        let prop = ComputedDiff::new(
            source.clone(),
            Arc::new(ExecutorWorker::new(executor.clone())),
            subtract,
        );
        let (id, log) = listen(&prop);
        source.set(5);
        assert!(prop.is_computing());
        prop.remove_change_listener(id);
        assert!(!prop.is_computing());
        executor.run_pending();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn diff_panic_skips_transition_and_pipeline_continues() {
        let panics = Arc::new(CollectPanics::new());
        let source = Arc::new(AtomicProperty::new(0_i64));
        let prop = ComputedDiff::with_panic_handler(
            source.clone(),
            Arc::new(InPlaceWorker),
            |old: &i64, new: &i64| {
                assert!(*new != 13, "unlucky value");
                new - old
            },
            panics.clone(),
        );
        let (_, log) = listen(&prop);
        source.set(13);
        source.set(20);
        assert_eq!(*log.lock(), vec![(0, 20, 20)]);
        assert_eq!(
            panics.take(),
            vec![(PanicOrigin::DiffComputation, "unlucky value".to_owned())]
        );
    }

    /// Applies one pending write just before registering a listener, as a
    /// concurrent writer racing with the subscription would.
    struct WriteBeforeListen {
        inner: AtomicProperty<i64>,
        write: Mutex<Option<i64>>,
    }

    impl Property<i64> for WriteBeforeListen {
        fn value(&self) -> i64 {
            self.inner.value()
        }

        fn may_change(&self) -> bool {
            true
        }

        fn is_concurrent(&self) -> bool {
            true
        }

        fn remove_change_listener(&self, id: ListenerId) -> bool {
            self.inner.remove_change_listener(id)
        }
    }

    impl SyncProperty<i64> for WriteBeforeListen {
        fn add_boxed_listener(
            &self,
            executor: Option<Arc<dyn Executor>>,
            listener: ChangeListener<i64>,
        ) -> ListenerId {
            if let Some(value) = self.write.lock().take() {
                self.inner.set(value);
            }
            self.inner.add_boxed_listener(executor, listener)
        }
    }

    #[test]
    fn upstream_write_during_attach_is_caught_up() {
        let source = Arc::new(WriteBeforeListen {
            inner: AtomicProperty::new(10),
            write: Mutex::new(Some(20)),
        });
        let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
        let (_, log) = listen(&prop);

        assert_eq!(prop.value(), 20);
        assert_eq!(*log.lock(), vec![(10, 20, 10)]);
        assert!(!prop.is_computing());

        source.inner.set(25);
        assert_eq!(*log.lock(), vec![(10, 20, 10), (20, 25, 5)]);
    }

    #[test]
    fn resubscribe_without_upstream_change_publishes_nothing() {
        let source = Arc::new(AtomicProperty::new(1_i64));
        let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
        let (id, _) = listen(&prop);
        prop.remove_change_listener(id);
        source.set(7);
        let (_, log) = listen(&prop);
        assert!(log.lock().is_empty());
        assert!(!prop.is_computing());
        assert_eq!(prop.value(), 7);
    }

    #[test]
    fn dropping_the_property_unsubscribes_upstream() {
        let source = Arc::new(AtomicProperty::new(0_i64));
        let prop = ComputedDiff::new(source.clone(), Arc::new(InPlaceWorker), subtract);
        let _ = listen(&prop);
        assert_eq!(source.listener_count(), 1);
        drop(prop);
        assert_eq!(source.listener_count(), 0);
        source.set(1);
    }
}
