// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Panic isolation for user callbacks.
//!
//! Listeners, executor tasks and diff computations are user code. A panic in
//! one of them must not unwind into the writer that triggered it, nor stop
//! delivery to the remaining listeners. Each callback runs under
//! [`catch_unwind`](std::panic::catch_unwind) and the payload is handed to a
//! [`PanicHandler`].

use core::any::Any;
use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

/// Payload of a caught panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Where an isolated panic came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PanicOrigin {
    /// A change or diff listener.
    Listener,
    /// A task run by an [`Executor`](crate::Executor).
    ExecutorTask,
    /// The diff function of a [`ComputedDiff`](crate::ComputedDiff).
    DiffComputation,
    /// The transform of a derived property.
    Transform,
}

impl fmt::Display for PanicOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Listener => "listener",
            Self::ExecutorTask => "executor task",
            Self::DiffComputation => "diff computation",
            Self::Transform => "transform",
        })
    }
}

/// Receives panics caught while running user callbacks.
pub trait PanicHandler: Send + Sync {
    /// Called once per caught panic, on the thread that caught it.
    fn handle(&self, origin: PanicOrigin, payload: PanicPayload);
}

/// Default handler: reports every panic as a `tracing` error event.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogPanics;

impl PanicHandler for LogPanics {
    fn handle(&self, origin: PanicOrigin, payload: PanicPayload) {
        tracing::error!(
            origin = %origin,
            message = %panic_message(payload.as_ref()),
            "panic isolated in reactive callback"
        );
    }
}

/// Records panic messages so they can be inspected later.
#[derive(Default)]
pub struct CollectPanics {
    entries: Mutex<Vec<(PanicOrigin, String)>>,
}

impl CollectPanics {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of panics recorded and not yet taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes and returns everything recorded so far, oldest first.
    pub fn take(&self) -> Vec<(PanicOrigin, String)> {
        core::mem::take(&mut *self.entries.lock())
    }
}

impl PanicHandler for CollectPanics {
    fn handle(&self, origin: PanicOrigin, payload: PanicPayload) {
        let message = panic_message(payload.as_ref());
        self.entries.lock().push((origin, message));
    }
}

impl fmt::Debug for CollectPanics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectPanics")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Extracts the message of a panic payload.
///
/// `panic!` payloads are either `&'static str` or `String`; anything else is
/// rendered as a placeholder.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

pub(crate) fn default_handler() -> Arc<dyn PanicHandler> {
    Arc::new(LogPanics)
}

/// Runs `f`, routing a panic to `handler` instead of unwinding.
pub(crate) fn isolate(handler: &dyn PanicHandler, origin: PanicOrigin, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        handler.handle(origin, payload);
    }
}
