// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property traits.

use std::sync::Arc;

use crate::executor::Executor;
use crate::listener::ListenerId;

/// Boxed `(old, new)` listener of a thread-safe property.
pub type ChangeListener<T> = Box<dyn Fn(&T, &T) + Send + Sync + 'static>;

/// Boxed `(old, new, diff)` listener of a diff property.
pub type DiffListener<T, D> = Box<dyn Fn(&T, &T, &D) + Send + Sync + 'static>;

/// A readable value that may change over time.
pub trait Property<T> {
    /// Returns a copy of the current value.
    fn value(&self) -> T;

    /// `false` if the value is fixed forever and listeners never fire.
    fn may_change(&self) -> bool;

    /// `true` if the property may be read and written from several threads.
    fn is_concurrent(&self) -> bool;

    /// Removes a listener. Returns `false` if `id` is not registered here.
    fn remove_change_listener(&self, id: ListenerId) -> bool;
}

/// A property that accepts writes.
pub trait MutableProperty<T>: Property<T> {
    /// Stores `value`. Writing a value equal to the current one does nothing.
    fn set(&self, value: T);

    /// Stores `new` if the current value equals `expected`.
    ///
    /// Returns `false`, without side effects, if the current value differs.
    fn compare_and_set(&self, expected: &T, new: T) -> bool;
}

/// A property whose listeners may be registered from any thread.
pub trait SyncProperty<T>: Property<T> + Send + Sync {
    /// Registers a boxed listener, optionally confined to `executor`.
    fn add_boxed_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<T>,
    ) -> ListenerId;

    /// Registers a listener that runs on the thread delivering the change.
    fn add_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
        Self: Sized,
    {
        self.add_boxed_listener(None, Box::new(listener))
    }

    /// Registers a listener whose invocations are posted to `executor`.
    fn add_change_listener_on<F>(&self, executor: Arc<dyn Executor>, listener: F) -> ListenerId
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
        Self: Sized,
    {
        self.add_boxed_listener(Some(executor), Box::new(listener))
    }
}

/// A property that also publishes a diff with every transition.
///
/// The diff of a transition is produced once and handed to every diff
/// listener; change listeners registered through [`SyncProperty`] see the
/// same transitions.
pub trait DiffProperty<T, D>: SyncProperty<T> {
    /// Registers a boxed diff listener, optionally confined to `executor`.
    fn add_boxed_diff_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: DiffListener<T, D>,
    ) -> ListenerId;

    /// Registers a diff listener that runs on the thread publishing the diff.
    fn add_diff_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T, &T, &D) + Send + Sync + 'static,
        Self: Sized,
    {
        self.add_boxed_diff_listener(None, Box::new(listener))
    }

    /// Registers a diff listener whose invocations are posted to `executor`.
    fn add_diff_listener_on<F>(&self, executor: Arc<dyn Executor>, listener: F) -> ListenerId
    where
        F: Fn(&T, &T, &D) + Send + Sync + 'static,
        Self: Sized,
    {
        self.add_boxed_diff_listener(Some(executor), Box::new(listener))
    }
}
