// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lock-free concurrent property.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::Executor;
use crate::listener::ListenerId;
use crate::notifier::{Callback, Notifier, Outcome, Step};
use crate::panic::{PanicHandler, default_handler};
use crate::property::{ChangeListener, MutableProperty, Property, SyncProperty};

/// A mutable property that can be shared between threads.
///
/// Writes are compare-and-swap loops over a single atomically replaced state
/// record; no lock is taken on the write path of an unbound property. Every transition is delivered
/// to each listener as the `(old, new)` pair its CAS witnessed, so the pairs a
/// listener receives always chain, even under contention.
///
/// The writer that finds no delivery in progress delivers its own transition
/// and any that other writers queue meanwhile. Other writers return as soon as
/// their CAS succeeds.
///
/// A property shared through an [`Arc`] can be [bound](Self::bind_to) to
/// another property, following its value until it is
/// [unbound](Self::unbind) or written to directly.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use understory_reactive::{AtomicProperty, MutableProperty, Property, SyncProperty};
///
/// let counter = Arc::new(AtomicProperty::new(0));
/// let last = Arc::new(AtomicI32::new(0));
/// let sink = last.clone();
/// counter.add_change_listener(move |_old, new| sink.store(*new, Ordering::SeqCst));
///
/// let writers: Vec<_> = (0..4)
///     .map(|_| {
///         let counter = counter.clone();
///         std::thread::spawn(move || {
///             for _ in 0..100 {
///                 counter.update(|v| v + 1);
///             }
///         })
///     })
///     .collect();
/// for writer in writers {
///     writer.join().unwrap();
/// }
/// assert_eq!(counter.value(), 400);
/// assert_eq!(last.load(Ordering::SeqCst), 400);
/// ```
pub struct AtomicProperty<T> {
    notifier: Notifier<T, ()>,
    binding: Mutex<Option<Binding<T>>>,
    /// Bumped by every bind and unbind; bound writes carry the value they
    /// were started under.
    generation: AtomicU64,
    bound: AtomicBool,
}

struct Binding<T> {
    sample: Arc<dyn SyncProperty<T>>,
    listener: ListenerId,
}

impl<T> AtomicProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
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
            binding: Mutex::new(None),
            generation: AtomicU64::new(0),
            bound: AtomicBool::new(false),
        }
    }

    /// Follows `sample`: takes its current value now and every value it
    /// changes to later.
    ///
    /// Replaces any previous binding. The binding ends with
    /// [`unbind`](Self::unbind), another `bind_to`, or a direct write
    /// (`set`, a successful `compare_and_set`, `update`, `swap`).
    pub fn bind_to<P>(self: &Arc<Self>, sample: Arc<P>)
    where
        P: SyncProperty<T> + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sample: Arc<dyn SyncProperty<T>> = sample;
        let listener = sample.may_change().then(|| {
            let this = Arc::downgrade(self);
            sample.add_boxed_listener(
                None,
                Box::new(move |_old: &T, new: &T| {
                    if let Some(this) = this.upgrade() {
                        this.follow(generation, new);
                    }
                }),
            )
        });
        let binding = listener.map(|listener| Binding {
            sample: Arc::clone(&sample),
            listener,
        });
        let dropped = {
            let mut current = self.binding.lock();
            if self.generation.load(Ordering::Acquire) == generation {
                self.bound.store(binding.is_some(), Ordering::Release);
                core::mem::replace(&mut *current, binding)
            } else {
                // Superseded by a later bind or unbind.
                binding
            }
        };
        if let Some(dropped) = dropped {
            dropped.sample.remove_change_listener(dropped.listener);
        }
        self.follow(generation, &sample.value());
    }

    /// Ends the current binding, if any. The value is left as it is.
    pub fn unbind(&self) {
        let dropped = {
            let mut current = self.binding.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.bound.store(false, Ordering::Release);
            current.take()
        };
        if let Some(dropped) = dropped {
            dropped.sample.remove_change_listener(dropped.listener);
            tracing::trace!("property unbound");
        }
    }

    /// Returns `true` while the property follows another one.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    fn follow(&self, generation: u64, value: &T) {
        self.notifier.transition(|current| {
            if self.generation.load(Ordering::Acquire) != generation {
                Step::Abort
            } else if current == value {
                Step::Keep
            } else {
                Step::Install(value.clone(), ())
            }
        });
    }

    fn release_binding(&self) {
        if self.is_bound() {
            self.unbind();
        }
    }

    /// Calls `f` with a reference to the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.notifier.with(f)
    }

    /// Atomically replaces the value with `f(current)`, retrying under
    /// contention, and returns the value installed.
    ///
    /// `f` may be called more than once.
    pub fn update(&self, mut f: impl FnMut(&T) -> T) -> T {
        self.release_binding();
        let mut installed = None;
        self.notifier.transition(|current| {
            let next = f(current);
            installed = Some(next.clone());
            if next == *current {
                Step::Keep
            } else {
                Step::Install(next, ())
            }
        });
        installed.unwrap_or_else(|| self.value())
    }

    /// Stores `value` and returns the value it replaced.
    pub fn swap(&self, value: T) -> T {
        self.release_binding();
        let mut kept = None;
        let outcome = self.notifier.transition(|current| {
            if *current == value {
                kept = Some(current.clone());
                Step::Keep
            } else {
                Step::Install(value.clone(), ())
            }
        });
        match (outcome, kept) {
            (Outcome::Installed { old }, _) => old,
            (_, Some(current)) => current,
            (_, None) => value,
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    /// The handler listener panics are reported to.
    #[must_use]
    pub fn panic_handler(&self) -> &Arc<dyn PanicHandler> {
        self.notifier.panics()
    }
}

impl<T> Property<T> for AtomicProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
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

impl<T> MutableProperty<T> for AtomicProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn set(&self, value: T) {
        self.release_binding();
        self.notifier.transition(|current| {
            if *current == value {
                Step::Keep
            } else {
                Step::Install(value.clone(), ())
            }
        });
    }

    fn compare_and_set(&self, expected: &T, new: T) -> bool {
        if self.is_bound() && self.notifier.with(|current| current == expected) {
            self.unbind();
        }
        let outcome = self.notifier.transition(|current| {
            if current != expected {
                Step::Abort
            } else if *current == new {
                Step::Keep
            } else {
                Step::Install(new.clone(), ())
            }
        });
        !matches!(outcome, Outcome::Aborted)
    }
}

impl<T> SyncProperty<T> for AtomicProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn add_boxed_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<T>,
    ) -> ListenerId {
        self.notifier.add(executor, Callback::Change(listener))
    }
}

impl<T> Drop for AtomicProperty<T> {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.get_mut().take() {
            binding.sample.remove_change_listener(binding.listener);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicProperty")
            .field("notifier", &self.notifier)
            .field("bound", &self.bound.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
