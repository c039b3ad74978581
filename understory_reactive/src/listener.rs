// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Listener identities and the single-threaded listener set.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::panic::{PanicHandler, PanicOrigin, isolate};

/// Identifies a registered listener; pass it back to remove the listener.
///
/// Ids are unique within the process, so an id obtained from one property
/// never removes a listener of another.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    #[must_use]
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerId").field(&self.0).finish()
    }
}

struct LocalSlot<T> {
    id: ListenerId,
    /// First transition sequence number this listener may see.
    since: u64,
    active: Cell<bool>,
    callback: Box<dyn Fn(&T, &T)>,
}

struct Queued<T> {
    seq: u64,
    old: T,
    new: T,
}

/// Listener set for single-threaded properties.
///
/// Notification passes iterate a snapshot of the slots, so listeners may be
/// added or removed from inside a callback. A transition raised while a pass
/// is running is queued and delivered by the outermost call once the current
/// pass is done.
pub(crate) struct LocalListeners<T> {
    slots: RefCell<Vec<Rc<LocalSlot<T>>>>,
    /// `Some` while a pass is running.
    pending: RefCell<Option<VecDeque<Queued<T>>>>,
    next_seq: Cell<u64>,
    panics: Arc<dyn PanicHandler>,
}

impl<T> LocalListeners<T> {
    pub(crate) fn new(panics: Arc<dyn PanicHandler>) -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            pending: RefCell::new(None),
            next_seq: Cell::new(0),
            panics,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub(crate) fn add(&self, callback: Box<dyn Fn(&T, &T)>) -> ListenerId {
        let id = ListenerId::next();
        self.slots.borrow_mut().push(Rc::new(LocalSlot {
            id,
            since: self.next_seq.get(),
            active: Cell::new(true),
            callback,
        }));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(index) = slots.iter().position(|slot| slot.id == id) else {
            return false;
        };
        let slot = slots.remove(index);
        slot.active.set(false);
        true
    }

    pub(crate) fn notify(&self, old: T, new: T) {
        let idle = self.pending.borrow().is_none();
        if idle && self.slots.borrow().is_empty() {
            return;
        }
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let mut current = Queued { seq, old, new };
        {
            let mut pending = self.pending.borrow_mut();
            match pending.as_mut() {
                Some(queue) => {
                    queue.push_back(current);
                    return;
                }
                None => *pending = Some(VecDeque::new()),
            }
        }
        loop {
            self.deliver(&current);
            let next = self.pending.borrow_mut().as_mut().and_then(VecDeque::pop_front);
            match next {
                Some(queued) => current = queued,
                None => break,
            }
        }
        *self.pending.borrow_mut() = None;
    }

    fn deliver(&self, transition: &Queued<T>) {
        let snapshot: Vec<_> = self.slots.borrow().clone();
        for slot in snapshot {
            if transition.seq < slot.since || !slot.active.get() {
                continue;
            }
            isolate(&*self.panics, PanicOrigin::Listener, || {
                (slot.callback)(&transition.old, &transition.new);
            });
        }
    }
}

impl<T> fmt::Debug for LocalListeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalListeners")
            .field("len", &self.len())
            .field("notifying", &self.pending.borrow().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panic::CollectPanics;

    fn recorder() -> (Rc<RefCell<Vec<(i32, i32)>>>, Box<dyn Fn(&i32, &i32)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, Box::new(move |o: &i32, n: &i32| sink.borrow_mut().push((*o, *n))))
    }

    #[test]
    fn ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn delivers_in_registration_order() {
        let set = LocalListeners::new(Arc::new(CollectPanics::new()));
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in 0..3 {
            let order = order.clone();
            set.add(Box::new(move |_: &i32, _: &i32| order.borrow_mut().push(tag)));
        }
        set.notify(1, 2);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn remove_returns_false_for_unknown_id() {
        let set = LocalListeners::<i32>::new(Arc::new(CollectPanics::new()));
        let (_, callback) = recorder();
        let id = set.add(callback);
        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn listener_added_during_pass_waits_for_next_transition() {
        let set = Rc::new(LocalListeners::new(Arc::new(CollectPanics::new())));
        let (late_log, late) = recorder();
        let late = RefCell::new(Some(late));
        let inner = Rc::downgrade(&set);
        set.add(Box::new(move |_: &i32, _: &i32| {
            if let (Some(set), Some(cb)) = (inner.upgrade(), late.borrow_mut().take()) {
                set.add(cb);
            }
        }));
        set.notify(0, 1);
        assert!(late_log.borrow().is_empty());
        set.notify(1, 2);
        assert_eq!(*late_log.borrow(), vec![(1, 2)]);
    }

    #[test]
    fn reentrant_notify_is_queued_after_current_pass() {
        let set = Rc::new(LocalListeners::new(Arc::new(CollectPanics::new())));
        let trace = Rc::new(RefCell::new(Vec::new()));
        let inner = Rc::downgrade(&set);
        let first = trace.clone();
        set.add(Box::new(move |o: &i32, n: &i32| {
            first.borrow_mut().push(("first", *o, *n));
            if *n == 1 {
                if let Some(set) = inner.upgrade() {
                    set.notify(1, 2);
                }
            }
        }));
        let second = trace.clone();
        set.add(Box::new(move |o: &i32, n: &i32| second.borrow_mut().push(("second", *o, *n))));
        set.notify(0, 1);
        assert_eq!(
            *trace.borrow(),
            vec![
                ("first", 0, 1),
                ("second", 0, 1),
                ("first", 1, 2),
                ("second", 1, 2),
            ]
        );
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let panics = Arc::new(CollectPanics::new());
        let set = LocalListeners::new(panics.clone());
        set.add(Box::new(|_: &i32, _: &i32| panic!("listener failed")));
        let (log, callback) = recorder();
        set.add(callback);
        set.notify(3, 4);
        assert_eq!(*log.borrow(), vec![(3, 4)]);
        assert_eq!(
            panics.take(),
            vec![(PanicOrigin::Listener, "listener failed".to_owned())]
        );
    }
}
