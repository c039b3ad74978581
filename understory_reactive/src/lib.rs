// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Reactive: observable properties with ordered change propagation.
//!
//! A property wraps a value and tells registered listeners about every change
//! as an `(old, new)` pair. Listeners of one property always see a chain:
//! the `new` of one notification is the `old` of the next.
//!
//! ## Property Kinds
//!
//! | Type | Threads | Notes |
//! |------|---------|-------|
//! | [`LocalProperty`] | owning thread only (`!Send`) | Listeners run synchronously inside `set`. |
//! | [`AtomicProperty`] | any | Lock-free CAS writes; one writer at a time delivers queued transitions. |
//! | [`ConstProperty`] | any | Never changes; listeners never fire. |
//! | [`AtomicDiffProperty`] | any | The writer supplies a diff with each value. |
//! | [`ComputedDiff`] | any | Diffs upstream transitions on a [`Worker`]. |
//! | [`MappedProperty`] | any | `transform(source)`, in place or on a [`Worker`]. |
//! | [`DerivedProperty`] | any | Recomputed when any of its upstreams changes. |
//!
//! The shared surface is a small set of traits: [`Property`] (read, listener
//! removal), [`MutableProperty`] (`set`, `compare_and_set`), [`SyncProperty`]
//! (listener registration from any thread) and [`DiffProperty`].
//!
//! ## Derived Properties
//!
//! [`PropertyExt`] composes properties shared through an `Arc`:
//! [`map`](PropertyExt::map), [`map_on`](PropertyExt::map_on),
//! [`map_with`](PropertyExt::map_with) and
//! [`distinct_by`](PropertyExt::distinct_by). A derived property listens to
//! its sources only while it has listeners of its own; otherwise reading it
//! computes the value on demand. An [`AtomicProperty`] can also follow
//! another property with [`AtomicProperty::bind_to`].
//!
//! ## Delivery Rules
//!
//! - Writing a value equal to the current one is a no-op.
//! - A listener registered while a notification is running does not see that
//!   notification; a listener removed while one is running is not called
//!   again, even later in the same pass.
//! - A write made from inside a listener is delivered once the current
//!   notification has reached every listener, so the call stack does not grow
//!   with cascaded updates.
//! - A panicking listener is isolated and reported to the property's
//!   [`PanicHandler`]; the writer never observes it. The default handler,
//!   [`LogPanics`], emits a `tracing` error event.
//!
//! ## Confinement
//!
//! A listener of a concurrent property may be confined to an [`Executor`]
//! with [`SyncProperty::add_change_listener_on`]: each notification becomes a
//! task on that executor, in order. [`SerialExecutor`] runs tasks on a
//! dedicated thread, [`ManualExecutor`] queues them until the owner pumps
//! the queue, and [`Unconfined`] runs them inline.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use understory_reactive::{AtomicProperty, ManualExecutor, MutableProperty, SyncProperty};
//!
//! let ui = Arc::new(ManualExecutor::new());
//! let title = AtomicProperty::new(String::from("untitled"));
//!
//! let shown = Arc::new(Mutex::new(Vec::new()));
//! let sink = shown.clone();
//! title.add_change_listener_on(ui.clone(), move |_old, new: &String| {
//!     sink.lock().unwrap().push(new.clone());
//! });
//!
//! title.set("draft".into());
//! title.set("final".into());
//! assert!(shown.lock().unwrap().is_empty());
//!
//! // The event loop runs the queued notifications in order.
//! ui.run_pending();
//! assert_eq!(*shown.lock().unwrap(), ["draft", "final"]);
//! ```
//!
//! ## Features
//!
//! This crate currently has no optional features. It requires `std` for
//! threads and unwinding.

mod atomic;
mod constant;
mod derived;
mod diff;
mod executor;
mod listener;
mod local;
mod mapped;
mod notifier;
mod panic;
mod property;
mod worker;

pub use atomic::AtomicProperty;
pub use constant::ConstProperty;
pub use derived::{DerivedProperty, PropertyExt, Upstream};
pub use diff::{AtomicDiffProperty, ComputedDiff};
pub use executor::{Executor, ManualExecutor, SerialExecutor, SerialExecutorBuilder, Task, Unconfined};
pub use listener::ListenerId;
pub use local::LocalProperty;
pub use mapped::MappedProperty;
pub use panic::{CollectPanics, LogPanics, PanicHandler, PanicOrigin, PanicPayload, panic_message};
pub use property::{
    ChangeListener, DiffListener, DiffProperty, MutableProperty, Property, SyncProperty,
};
pub use worker::{ExecutorWorker, InPlaceWorker, WorkHandle, Worker, WorkerExt};
