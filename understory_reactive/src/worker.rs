// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Background work with advisory cancellation.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::executor::{Executor, Task};

/// Cancellation token for a submitted job.
///
/// Cancellation is advisory: a job that has not started yet is skipped, a job
/// that is already running completes, but its result is not handed to the
/// callback.
#[derive(Clone, Debug, Default)]
pub struct WorkHandle {
    cancelled: Arc<AtomicBool>,
}

impl WorkHandle {
    /// Creates a live (not cancelled) handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called on any clone.
    #[must_use]
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runs jobs somewhere: inline, on a pool, on an event loop.
pub trait Worker: Send + Sync {
    /// Runs `job` eventually.
    fn submit(&self, job: Task);

    /// Cancels the job behind `handle`.
    fn cancel(&self, handle: &WorkHandle) {
        handle.cancel();
    }
}

/// Transform-then-callback helpers for every [`Worker`].
pub trait WorkerExt: Worker {
    /// Runs `transform(input)` on the worker and passes its output to
    /// `callback`, unless the returned handle is cancelled first.
    fn map<I, O, F, C>(&self, input: I, transform: F, callback: C) -> WorkHandle
    where
        I: Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
        C: FnOnce(O) + Send + 'static,
    {
        let handle = WorkHandle::new();
        self.map_with(&handle, input, transform, callback);
        handle
    }

    /// Like [`map`](Self::map), with a handle created by the caller.
    ///
    /// Useful when the handle must be recorded before the job can run, as
    /// with [`InPlaceWorker`].
    fn map_with<I, O, F, C>(&self, handle: &WorkHandle, input: I, transform: F, callback: C)
    where
        I: Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
        C: FnOnce(O) + Send + 'static,
    {
        let handle = handle.clone();
        self.submit(Box::new(move || {
            if handle.is_cancelled() {
                return;
            }
            let output = transform(input);
            if !handle.is_cancelled() {
                callback(output);
            }
        }));
    }
}

impl<W: Worker + ?Sized> WorkerExt for W {}

/// Runs jobs immediately on the submitting thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct InPlaceWorker;

impl Worker for InPlaceWorker {
    #[inline]
    fn submit(&self, job: Task) {
        job();
    }
}

/// Posts jobs to an [`Executor`].
#[derive(Clone)]
pub struct ExecutorWorker {
    executor: Arc<dyn Executor>,
}

impl ExecutorWorker {
    /// Creates a worker running jobs on `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl Worker for ExecutorWorker {
    fn submit(&self, job: Task) {
        self.executor.execute(job);
    }
}

impl fmt::Debug for ExecutorWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorWorker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ManualExecutor;
    use std::sync::mpsc;

    #[test]
    fn in_place_map_runs_synchronously() {
        let (tx, rx) = mpsc::channel();
        let handle = InPlaceWorker.map(20, |x| x * 2 + 2, move |y| tx.send(y).unwrap());
        assert!(!handle.is_cancelled());
        assert_eq!(rx.try_recv().unwrap(), 42);
    }

    #[test]
    fn cancel_before_start_skips_job() {
        let executor = Arc::new(ManualExecutor::new());
        let worker = ExecutorWorker::new(executor.clone());
        let (tx, rx) = mpsc::channel::<u32>();
        let handle = worker.map(1, |x| x + 1, move |y| tx.send(y).unwrap());
        worker.cancel(&handle);
        assert!(handle.is_cancelled());
        assert_eq!(executor.run_pending(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancel_during_transform_drops_result() {
        let handle = WorkHandle::new();
        let inside = handle.clone();
        let (tx, rx) = mpsc::channel::<u32>();
        InPlaceWorker.map_with(
            &handle,
            5,
            move |x| {
                inside.cancel();
                x
            },
            move |y| tx.send(y).unwrap(),
        );
        assert!(rx.try_recv().is_err());
    }
}
