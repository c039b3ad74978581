// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-threaded property.

use core::cell::RefCell;
use core::fmt;
use std::sync::Arc;

use crate::listener::{ListenerId, LocalListeners};
use crate::panic::{PanicHandler, default_handler};
use crate::property::{MutableProperty, Property};

/// A mutable property confined to the thread that created it.
///
/// `LocalProperty` is neither `Send` nor `Sync`, so the compiler enforces the
/// confinement. Listeners run synchronously inside [`set`](Self::set), in
/// registration order. A write made from inside a listener is delivered after
/// the current notification pass.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use understory_reactive::{LocalProperty, MutableProperty, Property};
///
/// let width = LocalProperty::new(10);
/// let seen = Rc::new(Cell::new(0));
/// let sink = seen.clone();
/// width.add_change_listener(move |_old, new| sink.set(*new));
///
/// width.set(20);
/// assert_eq!(width.value(), 20);
/// assert_eq!(seen.get(), 20);
/// ```
pub struct LocalProperty<T> {
    value: RefCell<T>,
    listeners: LocalListeners<T>,
}

impl<T: Clone + PartialEq + 'static> LocalProperty<T> {
    /// Creates a property whose listener panics are logged.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_panic_handler(value, default_handler())
    }

    /// Creates a property reporting listener panics to `handler`.
    #[must_use]
    pub fn with_panic_handler(value: T, handler: Arc<dyn PanicHandler>) -> Self {
        Self {
            value: RefCell::new(value),
            listeners: LocalListeners::new(handler),
        }
    }

    /// Calls `f` with a copy of the current value.
    ///
    /// The property is not borrowed while `f` runs, so `f` may write to it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let current = self.value();
        f(&current)
    }

    /// Replaces the value with `f(current)` and returns the new value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T {
        let next = self.with(f);
        self.set(next.clone());
        next
    }

    /// Registers a listener called with `(old, new)` after each change.
    pub fn add_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T, &T) + 'static,
    {
        self.listeners.add(Box::new(listener))
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn replace(&self, value: T) {
        let old = {
            let mut current = self.value.borrow_mut();
            if *current == value {
                return;
            }
            core::mem::replace(&mut *current, value.clone())
        };
        self.listeners.notify(old, value);
    }
}

impl<T: Clone + PartialEq + 'static> Property<T> for LocalProperty<T> {
    fn value(&self) -> T {
        self.value.borrow().clone()
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        false
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

impl<T: Clone + PartialEq + 'static> MutableProperty<T> for LocalProperty<T> {
    fn set(&self, value: T) {
        self.replace(value);
    }

    fn compare_and_set(&self, expected: &T, new: T) -> bool {
        if *self.value.borrow() != *expected {
            return false;
        }
        self.replace(new);
        true
    }
}

impl<T: fmt::Debug> fmt::Debug for LocalProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProperty")
            .field("value", &self.value.borrow())
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panic::CollectPanics;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record(prop: &LocalProperty<i32>) -> (ListenerId, Rc<RefCell<Vec<(i32, i32)>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let id = prop.add_change_listener(move |o, n| sink.borrow_mut().push((*o, *n)));
        (id, log)
    }

    #[test]
    fn set_notifies_with_old_and_new() {
        let prop = LocalProperty::new(1);
        let (_, log) = record(&prop);
        prop.set(2);
        prop.set(5);
        assert_eq!(*log.borrow(), vec![(1, 2), (2, 5)]);
    }

    #[test]
    fn equal_value_is_a_no_op() {
        let prop = LocalProperty::new(3);
        let (_, log) = record(&prop);
        prop.set(3);
        assert!(prop.compare_and_set(&3, 3));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn compare_and_set_checks_expected() {
        let prop = LocalProperty::new(3);
        let (_, log) = record(&prop);
        assert!(!prop.compare_and_set(&4, 10));
        assert_eq!(prop.value(), 3);
        assert!(prop.compare_and_set(&3, 10));
        assert_eq!(*log.borrow(), vec![(3, 10)]);
    }

    #[test]
    fn update_and_with() {
        let prop = LocalProperty::new(String::from("a"));
        assert_eq!(prop.update(|s| format!("{s}b")), "ab");
        assert_eq!(prop.with(String::len), 2);
    }

    #[test]
    fn with_and_update_closures_may_write() {
        let prop = LocalProperty::new(1);
        let (_, log) = record(&prop);
        let seen = prop.with(|v| {
            prop.set(v + 1);
            *v
        });
        assert_eq!(seen, 1);
        let next = prop.update(|v| {
            prop.set(10);
            v + 1
        });
        assert_eq!(next, 3);
        assert_eq!(*log.borrow(), vec![(1, 2), (2, 10), (10, 3)]);
    }

    #[test]
    fn write_from_listener_keeps_chain_ordered() {
        let prop = Rc::new(LocalProperty::new(0));
        let weak = Rc::downgrade(&prop);
        prop.add_change_listener(move |_, new| {
            if *new < 3 {
                if let Some(prop) = weak.upgrade() {
                    prop.set(new + 1);
                }
            }
        });
        let (_, log) = record(&prop);
        prop.set(1);
        assert_eq!(prop.value(), 3);
        assert_eq!(*log.borrow(), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn removal_by_earlier_listener_skips_later_one_in_same_pass() {
        let prop = Rc::new(LocalProperty::new(0));
        let victim = Rc::new(RefCell::new(None::<ListenerId>));
        let weak = Rc::downgrade(&prop);
        let target = victim.clone();
        prop.add_change_listener(move |_, _| {
            if let (Some(prop), Some(id)) = (weak.upgrade(), *target.borrow()) {
                prop.remove_change_listener(id);
            }
        });
        let (id, log) = record(&prop);
        *victim.borrow_mut() = Some(id);
        prop.set(1);
        prop.set(2);
        assert!(log.borrow().is_empty());
        assert_eq!(prop.listener_count(), 1);
    }

    #[test]
    fn panicking_listener_does_not_reach_writer() {
        let panics = Arc::new(CollectPanics::new());
        let prop = LocalProperty::with_panic_handler(0, panics.clone());
        prop.add_change_listener(|_, _| panic!("bad listener"));
        let (_, log) = record(&prop);
        prop.set(1);
        assert_eq!(*log.borrow(), vec![(0, 1)]);
        assert_eq!(panics.len(), 1);
    }
}
