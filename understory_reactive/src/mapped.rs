// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A property holding a transform of another property.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::diff::Pipeline;
use crate::executor::Executor;
use crate::listener::ListenerId;
use crate::notifier::{Callback, Notifier, Step};
use crate::panic::{PanicHandler, PanicOrigin, PanicPayload, default_handler};
use crate::property::{ChangeListener, Property, SyncProperty};
use crate::worker::{WorkHandle, Worker, WorkerExt};

type TransformFn<T, R> = dyn Fn(&T) -> R + Send + Sync;

/// `transform(source)`, recomputed on a [`Worker`] when the source changes.
///
/// Usually created with [`PropertyExt::map`](crate::PropertyExt::map) or
/// [`PropertyExt::map_on`](crate::PropertyExt::map_on).
///
/// While unobserved the property holds nothing and [`value`](Property::value)
/// runs the transform on demand. The first listener subscribes upstream and
/// runs the transform once on the registering thread; later upstream changes
/// are transformed on the worker, one at a time, coalescing to the newest
/// upstream value. Results equal to the current value are not published.
pub struct MappedProperty<T, R> {
    source: Arc<dyn SyncProperty<T>>,
    transform: Arc<TransformFn<T, R>>,
    worker: Arc<dyn Worker>,
    notifier: Notifier<R, ()>,
    epoch: AtomicU64,
    pipeline: Mutex<Pipeline<T>>,
    this: Weak<Self>,
}

impl<T, R> MappedProperty<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a mapped property; transform and listener panics are logged.
    pub fn new<P, F>(source: Arc<P>, worker: Arc<dyn Worker>, transform: F) -> Arc<Self>
    where
        P: SyncProperty<T> + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        Self::with_panic_handler(source, worker, transform, default_handler())
    }

    /// Like [`new`](Self::new), reporting panics to `handler`.
    pub fn with_panic_handler<P, F>(
        source: Arc<P>,
        worker: Arc<dyn Worker>,
        transform: F,
        handler: Arc<dyn PanicHandler>,
    ) -> Arc<Self>
    where
        P: SyncProperty<T> + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let initial = transform(&source.value());
        Arc::new_cyclic(|this| Self {
            source,
            transform: Arc::new(transform),
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

    /// Returns `true` while a transform is running or queued on the worker.
    #[must_use]
    pub fn is_computing(&self) -> bool {
        self.pipeline.lock().in_flight.is_some()
    }

    fn register(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<R>,
    ) -> ListenerId {
        let (id, catch_up) = {
            let mut pipeline = self.pipeline.lock();
            let catch_up = if pipeline.upstream.is_none() {
                self.attach(&mut pipeline)
            } else {
                None
            };
            (self.notifier.add(executor, Callback::Change(listener)), catch_up)
        };
        if let Some((epoch, handle, target)) = catch_up {
            self.start(epoch, handle, target);
        }
        id
    }

    fn attach(&self, pipeline: &mut Pipeline<T>) -> Option<(u64, WorkHandle, T)> {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        pipeline.latest = None;
        pipeline.in_flight = None;
        let base = self.source.value();
        self.notifier.reset((self.transform)(&base));
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
        tracing::debug!(epoch, "mapped property attached to upstream");

        let current = self.source.value();
        if current == base {
            return None;
        }
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
        }
        tracing::debug!("mapped property detached from upstream");
    }

    fn on_upstream(&self, epoch: u64, target: T) {
        let handle = {
            let mut pipeline = self.pipeline.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            if pipeline.in_flight.is_some() {
                pipeline.latest = Some(target);
                return;
            }
            let handle = WorkHandle::new();
            pipeline.in_flight = Some(handle.clone());
            handle
        };
        self.start(epoch, handle, target);
    }

    fn start(&self, epoch: u64, handle: WorkHandle, target: T) {
        let transform = Arc::clone(&self.transform);
        let this = self.this.clone();
        self.worker.map_with(
            &handle,
            target,
            move |target| catch_unwind(AssertUnwindSafe(|| transform(&target))),
            move |result| {
                if let Some(this) = this.upgrade() {
                    this.complete(epoch, result);
                }
            },
        );
    }

    fn complete(&self, epoch: u64, result: Result<R, PanicPayload>) {
        match result {
            Ok(mapped) => {
                self.notifier.transition(|current| {
                    if self.epoch.load(Ordering::Acquire) != epoch {
                        Step::Abort
                    } else if *current == mapped {
                        Step::Keep
                    } else {
                        Step::Install(mapped.clone(), ())
                    }
                });
            }
            Err(payload) => self.notifier.panics().handle(PanicOrigin::Transform, payload),
        }

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

impl<T, R> Property<R> for MappedProperty<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn value(&self) -> R {
        if self.is_observed() {
            self.notifier.value()
        } else {
            (self.transform)(&self.source.value())
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

impl<T, R> SyncProperty<R> for MappedProperty<T, R>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn add_boxed_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<R>,
    ) -> ListenerId {
        self.register(executor, listener)
    }
}

impl<T, R> Drop for MappedProperty<T, R> {
    fn drop(&mut self) {
        if let Some(id) = self.pipeline.get_mut().upstream.take() {
            self.source.remove_change_listener(id);
        }
    }
}

impl<T, R: fmt::Debug> fmt::Debug for MappedProperty<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pipeline = self.pipeline.lock();
        f.debug_struct("MappedProperty")
            .field("published", &self.notifier)
            .field("attached", &pipeline.upstream.is_some())
            .field("computing", &pipeline.in_flight.is_some())
            .finish_non_exhaustive()
    }
}
