// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Properties computed from other properties.
//!
//! [`PropertyExt`] adds combinators to every [`SyncProperty`] held in an
//! [`Arc`]:
//!
//! - [`map`](PropertyExt::map) and [`map_on`](PropertyExt::map_on) transform
//!   one property, in place or on a [`Worker`].
//! - [`map_with`](PropertyExt::map_with) combines two properties.
//! - [`distinct_by`](PropertyExt::distinct_by) drops transitions a custom
//!   equality considers unchanged.
//!
//! [`DerivedProperty`] is the general form: a value recomputed from a closure
//! whenever any of a list of [`Upstream`]s changes. Derived properties only
//! listen upstream while they are observed themselves.

use core::fmt;
use core::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::executor::Executor;
use crate::listener::ListenerId;
use crate::mapped::MappedProperty;
use crate::notifier::{Callback, Notifier, Step};
use crate::panic::{PanicHandler, PanicOrigin, default_handler, isolate};
use crate::property::{ChangeListener, Property, SyncProperty};
use crate::worker::{InPlaceWorker, Worker};

/// A change source seen without its value type.
pub trait Upstream: Send + Sync {
    /// `false` if the source never changes.
    fn may_change(&self) -> bool;

    /// Calls `on_change` after each change of the source.
    fn watch(&self, on_change: Box<dyn Fn() + Send + Sync>) -> ListenerId;

    /// Stops a watch started with [`watch`](Self::watch).
    fn unwatch(&self, id: ListenerId) -> bool;
}

struct Watched<T, P: ?Sized> {
    prop: Arc<P>,
    value: PhantomData<fn() -> T>,
}

impl<T: 'static, P: SyncProperty<T> + ?Sized> Upstream for Watched<T, P> {
    fn may_change(&self) -> bool {
        self.prop.may_change()
    }

    fn watch(&self, on_change: Box<dyn Fn() + Send + Sync>) -> ListenerId {
        self.prop
            .add_boxed_listener(None, Box::new(move |_: &T, _: &T| on_change()))
    }

    fn unwatch(&self, id: ListenerId) -> bool {
        self.prop.remove_change_listener(id)
    }
}

type ComputeFn<R> = dyn Fn() -> R + Send + Sync;
type SameFn<R> = dyn Fn(&R, &R) -> bool + Send + Sync;

/// A value recomputed whenever one of its upstreams changes.
///
/// ```
/// use std::sync::Arc;
/// use understory_reactive::{
///     AtomicProperty, DerivedProperty, MutableProperty, Property, PropertyExt, SyncProperty,
/// };
///
/// let first = Arc::new(AtomicProperty::new(String::from("Ada")));
/// let last = Arc::new(AtomicProperty::new(String::from("Lovelace")));
/// let (f, l) = (first.clone(), last.clone());
/// let full = DerivedProperty::new(vec![first.upstream(), last.upstream()], move || {
///     format!("{} {}", f.value(), l.value())
/// });
///
/// full.add_change_listener(|old, new| println!("{old} -> {new}"));
/// last.set("Byron".into());
/// assert_eq!(full.value(), "Ada Byron");
/// ```
pub struct DerivedProperty<R> {
    upstreams: Box<[Arc<dyn Upstream>]>,
    compute: Box<ComputeFn<R>>,
    same: Box<SameFn<R>>,
    notifier: Notifier<R, ()>,
    /// Watch ids, one per upstream, while observed.
    watching: Mutex<Option<Vec<ListenerId>>>,
    this: Weak<Self>,
}

impl<R> DerivedProperty<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Creates a property recomputing `compute` after each upstream change.
    pub fn new<F>(upstreams: Vec<Arc<dyn Upstream>>, compute: F) -> Arc<Self>
    where
        R: PartialEq,
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self::with_equality(upstreams, compute, R::eq)
    }

    /// Like [`new`](Self::new); a recomputed value is only published if
    /// `same(current, recomputed)` is `false`.
    pub fn with_equality<F, S>(
        upstreams: Vec<Arc<dyn Upstream>>,
        compute: F,
        same: S,
    ) -> Arc<Self>
    where
        F: Fn() -> R + Send + Sync + 'static,
        S: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        Self::with_panic_handler(upstreams, compute, same, default_handler())
    }

    /// Like [`with_equality`](Self::with_equality), reporting panics to
    /// `handler`.
    pub fn with_panic_handler<F, S>(
        upstreams: Vec<Arc<dyn Upstream>>,
        compute: F,
        same: S,
        handler: Arc<dyn PanicHandler>,
    ) -> Arc<Self>
    where
        F: Fn() -> R + Send + Sync + 'static,
        S: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        let initial = compute();
        Arc::new_cyclic(|this| Self {
            upstreams: upstreams.into_boxed_slice(),
            compute: Box::new(compute),
            same: Box::new(same),
            notifier: Notifier::new(initial, handler),
            watching: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Returns `true` while at least one listener is registered.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.notifier.listener_count() > 0
    }

    fn recompute(&self) {
        isolate(&**self.notifier.panics(), PanicOrigin::Transform, || {
            self.notifier.transition(|current| {
                let next = (self.compute)();
                if (self.same)(current, &next) {
                    Step::Keep
                } else {
                    Step::Install(next, ())
                }
            });
        });
    }

    fn register(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<R>,
    ) -> ListenerId {
        let (id, attached) = {
            let mut watching = self.watching.lock();
            let attached = watching.is_none();
            if attached {
                self.notifier.reset((self.compute)());
                let ids = self
                    .upstreams
                    .iter()
                    .map(|upstream| {
                        let this = self.this.clone();
                        upstream.watch(Box::new(move || {
                            if let Some(this) = this.upgrade() {
                                this.recompute();
                            }
                        }))
                    })
                    .collect();
                *watching = Some(ids);
                tracing::debug!(upstreams = self.upstreams.len(), "derived property attached");
            }
            (self.notifier.add(executor, Callback::Change(listener)), attached)
        };
        if attached {
            // Catches up with upstream writes that raced the watches.
            self.recompute();
        }
        id
    }

    fn unwatch_all(&self, ids: Vec<ListenerId>) {
        for (upstream, id) in self.upstreams.iter().zip(ids) {
            upstream.unwatch(id);
        }
    }
}

impl<R> Property<R> for DerivedProperty<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn value(&self) -> R {
        if self.is_observed() {
            self.notifier.value()
        } else {
            (self.compute)()
        }
    }

    fn may_change(&self) -> bool {
        self.upstreams.iter().any(|upstream| upstream.may_change())
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        let mut watching = self.watching.lock();
        let removed = self.notifier.remove(id);
        if removed && self.notifier.listener_count() == 0 {
            if let Some(ids) = watching.take() {
                self.unwatch_all(ids);
                tracing::debug!("derived property detached");
            }
        }
        removed
    }
}

impl<R> SyncProperty<R> for DerivedProperty<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn add_boxed_listener(
        &self,
        executor: Option<Arc<dyn Executor>>,
        listener: ChangeListener<R>,
    ) -> ListenerId {
        self.register(executor, listener)
    }
}

impl<R> Drop for DerivedProperty<R> {
    fn drop(&mut self) {
        if let Some(ids) = self.watching.get_mut().take() {
            for (upstream, id) in self.upstreams.iter().zip(ids) {
                upstream.unwatch(id);
            }
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for DerivedProperty<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedProperty")
            .field("published", &self.notifier)
            .field("upstreams", &self.upstreams.len())
            .field("attached", &self.watching.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Combinators for properties shared through an [`Arc`].
pub trait PropertyExt<T>: SyncProperty<T> {
    /// Erases the value type, for use as a [`DerivedProperty`] upstream.
    fn upstream(self: &Arc<Self>) -> Arc<dyn Upstream>
    where
        Self: 'static,
        T: 'static,
    {
        Arc::new(Watched {
            prop: Arc::clone(self),
            value: PhantomData,
        })
    }

    /// `transform(self)`, computed on the thread delivering each change.
    fn map<R, F>(self: &Arc<Self>, transform: F) -> Arc<MappedProperty<T, R>>
    where
        Self: Sized + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        R: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        MappedProperty::new(Arc::clone(self), Arc::new(InPlaceWorker), transform)
    }

    /// `transform(self)`, computed on `worker` after the first time.
    fn map_on<R, F>(
        self: &Arc<Self>,
        worker: Arc<dyn Worker>,
        transform: F,
    ) -> Arc<MappedProperty<T, R>>
    where
        Self: Sized + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        R: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        MappedProperty::new(Arc::clone(self), worker, transform)
    }

    /// `transform(self, other)`, recomputed when either side changes.
    fn map_with<U, Q, R, F>(
        self: &Arc<Self>,
        other: &Arc<Q>,
        transform: F,
    ) -> Arc<DerivedProperty<R>>
    where
        Self: Sized + 'static,
        T: 'static,
        U: 'static,
        Q: SyncProperty<U> + 'static,
        R: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T, &U) -> R + Send + Sync + 'static,
    {
        let (left, right) = (Arc::clone(self), Arc::clone(other));
        DerivedProperty::new(vec![self.upstream(), other.upstream()], move || {
            transform(&left.value(), &right.value())
        })
    }

    /// `self`, publishing only values that `same` tells apart from the last
    /// published one.
    fn distinct_by<F>(self: &Arc<Self>, same: F) -> Arc<DerivedProperty<T>>
    where
        Self: Sized + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let source = Arc::clone(self);
        DerivedProperty::with_equality(vec![self.upstream()], move || source.value(), same)
    }
}

impl<T, P: SyncProperty<T> + ?Sized> PropertyExt<T> for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::AtomicProperty;
    use crate::constant::ConstProperty;
    use crate::panic::CollectPanics;
    use crate::property::MutableProperty;

    fn record<R: Clone + Send + Sync + 'static>(
        prop: &DerivedProperty<R>,
    ) -> (ListenerId, Arc<Mutex<Vec<(R, R)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let id = prop.add_change_listener(move |o: &R, n: &R| {
            sink.lock().push((o.clone(), n.clone()));
        });
        (id, log)
    }

    #[test]
    fn map_with_follows_both_sides() {
        let width = Arc::new(AtomicProperty::new(2));
        let height = Arc::new(AtomicProperty::new(3));
        let area = width.map_with(&height, |w: &i32, h: &i32| w * h);
        let (_, log) = record(&area);

        width.set(4);
        height.set(5);
        width.set(5);
        height.set(4);
        assert_eq!(*log.lock(), vec![(6, 12), (12, 20), (20, 25), (25, 20)]);
        assert_eq!(area.value(), 20);
    }

    #[test]
    fn equal_recomputation_is_not_published() {
        let a = Arc::new(AtomicProperty::new(1));
        let b = Arc::new(AtomicProperty::new(2));
        let sum = a.map_with(&b, |a: &i32, b: &i32| a + b);
        let (_, log) = record(&sum);
        a.set(2);
        b.set(1);
        assert_eq!(*log.lock(), vec![(3, 4), (4, 3)]);
    }

    #[test]
    fn watches_follow_observed_state() {
        let a = Arc::new(AtomicProperty::new(1));
        let b = Arc::new(AtomicProperty::new(1));
        let sum = a.map_with(&b, |a: &i32, b: &i32| a + b);
        assert!(!sum.is_observed());
        assert_eq!(a.listener_count(), 0);

        let (id, _) = record(&sum);
        assert_eq!((a.listener_count(), b.listener_count()), (1, 1));
        assert!(sum.remove_change_listener(id));
        assert_eq!((a.listener_count(), b.listener_count()), (0, 0));

        a.set(10);
        assert_eq!(sum.value(), 11);
        let (_, log) = record(&sum);
        b.set(5);
        assert_eq!(*log.lock(), vec![(11, 15)]);
    }

    #[test]
    fn distinct_by_compares_with_last_published() {
        let name = Arc::new(AtomicProperty::new(String::from("ada")));
        let folded = name.distinct_by(|a: &String, b: &String| a.eq_ignore_ascii_case(b));
        let (_, log) = record(&folded);

        name.set("ADA".into());
        name.set("Ada".into());
        name.set("grace".into());
        assert_eq!(*log.lock(), vec![("ada".to_owned(), "grace".to_owned())]);
        assert_eq!(folded.value(), "grace");
    }

    #[test]
    fn constant_upstream_never_changes() {
        let fixed = Arc::new(ConstProperty::new(4));
        let live = Arc::new(AtomicProperty::new(1));
        let product = live.map_with(&fixed, |a: &i32, b: &i32| a * b);
        assert!(product.may_change());
        let only_fixed = fixed.map_with(&fixed, |a: &i32, b: &i32| a + b);
        assert!(!only_fixed.may_change());
        assert_eq!(only_fixed.value(), 8);
    }

    #[test]
    fn derived_properties_chain() {
        let base = Arc::new(AtomicProperty::new(1));
        let doubled = base.map(|v: &i32| v * 2);
        let label = doubled.map_with(&base, |d: &i32, b: &i32| format!("{b}x2={d}"));
        let (_, log) = record(&label);
        base.set(3);
        assert_eq!(label.value(), "3x2=6");
        assert_eq!(log.lock().last().map(|(_, new)| new.clone()), Some("3x2=6".to_owned()));
        assert!(log.lock().windows(2).all(|w| w[0].1 == w[1].0));
    }

    #[test]
    fn compute_panic_is_isolated() {
        let panics = Arc::new(CollectPanics::new());
        let source = Arc::new(AtomicProperty::new(0));
        let s = source.clone();
        let derived = DerivedProperty::with_panic_handler(
            vec![source.upstream()],
            move || {
                let v = s.value();
                assert!(v >= 0, "negative");
                v
            },
            |a: &i32, b: &i32| a == b,
            panics.clone(),
        );
        let (_, log) = record(&derived);
        source.set(-1);
        source.set(2);
        assert_eq!(*log.lock(), vec![(0, 2)]);
        assert_eq!(panics.take(), vec![(PanicOrigin::Transform, "negative".to_owned())]);
    }
}
