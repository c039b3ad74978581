// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lock-free state cell shared by the concurrent properties.
//!
//! The whole observable state of a concurrent property lives in one immutable
//! record swapped with `ArcSwap::compare_and_swap`:
//!
//! - the current value,
//! - the listener snapshot,
//! - the queue of transitions awaiting delivery.
//!
//! ## Invariants
//!
//! 1. A transition is queued by the same CAS that installs its new value, so
//!    queued transitions form a chain (`new_k == old_{k+1}`).
//! 2. The queue is non-empty exactly while some thread is draining it. The
//!    writer whose CAS turns the queue non-empty is that thread.
//! 3. Only the drainer removes entries, and only from the front, after the
//!    front transition has been handed to every listener.
//! 4. A listener only sees transitions queued after its registration.
//! 5. Nothing a listener or an executor does can unwind out of `drain`.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};

use crate::executor::Executor;
use crate::listener::ListenerId;
use crate::panic::{PanicHandler, PanicOrigin, isolate};

pub(crate) enum Callback<T, D> {
    Change(Box<dyn Fn(&T, &T) + Send + Sync>),
    Diff(Box<dyn Fn(&T, &T, &D) + Send + Sync>),
}

struct Slot<T, D> {
    id: ListenerId,
    since: AtomicU64,
    active: AtomicBool,
    executor: Option<Arc<dyn Executor>>,
    callback: Callback<T, D>,
}

impl<T, D> Slot<T, D> {
    fn invoke(&self, transition: &Transition<T, D>, panics: &dyn PanicHandler) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        isolate(panics, PanicOrigin::Listener, || match &self.callback {
            Callback::Change(f) => f(&transition.old, &transition.new),
            Callback::Diff(f) => f(&transition.old, &transition.new, &transition.diff),
        });
    }
}

struct Transition<T, D> {
    seq: u64,
    old: T,
    new: T,
    diff: D,
}

struct State<T, D> {
    value: T,
    listeners: Arc<Vec<Arc<Slot<T, D>>>>,
    pending: VecDeque<Arc<Transition<T, D>>>,
    next_seq: u64,
}

/// What a transition function decided for the value it was shown.
pub(crate) enum Step<T, D> {
    /// Leave the state untouched and report failure.
    Abort,
    /// Leave the state untouched and report success.
    Keep,
    /// Install a new value with the diff describing the change.
    Install(T, D),
}

/// Result of [`Notifier::transition`].
pub(crate) enum Outcome<T> {
    Aborted,
    Kept,
    Installed { old: T },
}

pub(crate) struct Notifier<T, D> {
    state: ArcSwap<State<T, D>>,
    panics: Arc<dyn PanicHandler>,
}

impl<T, D> Notifier<T, D>
where
    T: Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(value: T, panics: Arc<dyn PanicHandler>) -> Self {
        Self {
            state: ArcSwap::from_pointee(State {
                value,
                listeners: Arc::new(Vec::new()),
                pending: VecDeque::new(),
                next_seq: 0,
            }),
            panics,
        }
    }

    pub(crate) fn panics(&self) -> &Arc<dyn PanicHandler> {
        &self.panics
    }

    pub(crate) fn value(&self) -> T {
        self.state.load().value.clone()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.load().value)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.state.load().listeners.len()
    }

    /// CAS loop applying `step` to the current value.
    ///
    /// `step` may run several times under contention; it must be pure.
    pub(crate) fn transition(&self, mut step: impl FnMut(&T) -> Step<T, D>) -> Outcome<T> {
        let mut current = self.state.load_full();
        loop {
            let (new, diff) = match step(&current.value) {
                Step::Abort => return Outcome::Aborted,
                Step::Keep => return Outcome::Kept,
                Step::Install(new, diff) => (new, diff),
            };
            let queue = !current.listeners.is_empty() || !current.pending.is_empty();
            let mut pending = current.pending.clone();
            let mut next_seq = current.next_seq;
            if queue {
                pending.push_back(Arc::new(Transition {
                    seq: next_seq,
                    old: current.value.clone(),
                    new: new.clone(),
                    diff,
                }));
                next_seq += 1;
            }
            let next = Arc::new(State {
                value: new,
                listeners: Arc::clone(&current.listeners),
                pending,
                next_seq,
            });
            match self.swap_from(&current, next) {
                Ok(()) => {
                    if queue && current.pending.is_empty() {
                        self.drain();
                    }
                    return Outcome::Installed {
                        old: current.value.clone(),
                    };
                }
                Err(witnessed) => current = witnessed,
            }
        }
    }

    /// Replaces the value without notifying anyone.
    pub(crate) fn reset(&self, value: T) {
        self.update_state(|state| State {
            value: value.clone(),
            listeners: Arc::clone(&state.listeners),
            pending: state.pending.clone(),
            next_seq: state.next_seq,
        });
    }

    pub(crate) fn add(
        &self,
        executor: Option<Arc<dyn Executor>>,
        callback: Callback<T, D>,
    ) -> ListenerId {
        let id = ListenerId::next();
        let slot = Arc::new(Slot {
            id,
            since: AtomicU64::new(0),
            active: AtomicBool::new(true),
            executor,
            callback,
        });
        self.update_state(|state| {
            // Not visible to other threads until the swap succeeds.
            slot.since.store(state.next_seq, Ordering::Relaxed);
            let mut listeners = Vec::with_capacity(state.listeners.len() + 1);
            listeners.extend(state.listeners.iter().cloned());
            listeners.push(Arc::clone(&slot));
            State {
                value: state.value.clone(),
                listeners: Arc::new(listeners),
                pending: state.pending.clone(),
                next_seq: state.next_seq,
            }
        });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        if !self.state.load().listeners.iter().any(|slot| slot.id == id) {
            return false;
        }
        let mut removed = None;
        self.update_state(|state| {
            removed = state.listeners.iter().find(|slot| slot.id == id).cloned();
            State {
                value: state.value.clone(),
                listeners: Arc::new(
                    state
                        .listeners
                        .iter()
                        .filter(|slot| slot.id != id)
                        .cloned()
                        .collect(),
                ),
                pending: state.pending.clone(),
                next_seq: state.next_seq,
            }
        });
        match removed {
            Some(slot) => {
                slot.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn update_state(&self, mut f: impl FnMut(&State<T, D>) -> State<T, D>) {
        let mut current = self.state.load_full();
        loop {
            let next = Arc::new(f(&current));
            match self.swap_from(&current, next) {
                Ok(()) => return,
                Err(witnessed) => current = witnessed,
            }
        }
    }

    fn swap_from(
        &self,
        current: &Arc<State<T, D>>,
        next: Arc<State<T, D>>,
    ) -> Result<(), Arc<State<T, D>>> {
        let previous = self.state.compare_and_swap(current, next);
        if Arc::ptr_eq(&*previous, current) {
            Ok(())
        } else {
            Err(Guard::into_inner(previous))
        }
    }

    fn drain(&self) {
        loop {
            let state = self.state.load_full();
            let Some(head) = state.pending.front().cloned() else {
                return;
            };
            self.deliver(&state.listeners, &head);

            let mut current = state;
            loop {
                let mut pending = current.pending.clone();
                pending.pop_front();
                let more = !pending.is_empty();
                let next = Arc::new(State {
                    value: current.value.clone(),
                    listeners: Arc::clone(&current.listeners),
                    pending,
                    next_seq: current.next_seq,
                });
                match self.swap_from(&current, next) {
                    Ok(()) if more => break,
                    Ok(()) => return,
                    Err(witnessed) => current = witnessed,
                }
            }
        }
    }

    fn deliver(&self, listeners: &[Arc<Slot<T, D>>], transition: &Arc<Transition<T, D>>) {
        for slot in listeners {
            if transition.seq < slot.since.load(Ordering::Relaxed)
                || !slot.active.load(Ordering::Acquire)
            {
                continue;
            }
            match &slot.executor {
                None => slot.invoke(transition, &*self.panics),
                Some(executor) => {
                    let slot = Arc::clone(slot);
                    let transition = Arc::clone(transition);
                    let panics = Arc::clone(&self.panics);
                    isolate(&*self.panics, PanicOrigin::ExecutorTask, || {
                        executor.execute(Box::new(move || slot.invoke(&transition, &*panics)));
                    });
                }
            }
        }
    }
}

impl<T: fmt::Debug, D> fmt::Debug for Notifier<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load();
        f.debug_struct("Notifier")
            .field("value", &state.value)
            .field("listeners", &state.listeners.len())
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}
