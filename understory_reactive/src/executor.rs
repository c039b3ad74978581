// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Executors decide where a confined listener runs.
//!
//! Confinement controls which thread observes a change, not how writers are
//! serialized. A listener registered with
//! [`add_change_listener_on`](crate::SyncProperty::add_change_listener_on)
//! receives each transition as a task posted to its executor. Per-listener
//! FIFO order holds as long as the executor runs tasks in submission order,
//! which all executors in this module do.

use core::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Sender};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::panic::{PanicHandler, PanicOrigin, default_handler, isolate};

/// A unit of work posted to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks, possibly on another thread.
pub trait Executor: Send + Sync {
    /// Schedules `task`. Tasks submitted from one thread run in submission order.
    fn execute(&self, task: Task);
}

/// Runs every task inline on the submitting thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct Unconfined;

impl Executor for Unconfined {
    #[inline]
    fn execute(&self, task: Task) {
        task();
    }
}

enum Message {
    Run(Task),
    Stop,
}

/// A dedicated thread draining a FIFO task queue.
///
/// Tasks that panic are reported to the executor's [`PanicHandler`]; the
/// thread keeps running. Dropping the executor (or calling
/// [`shutdown`](Self::shutdown)) lets already queued tasks finish and joins the
/// thread.
pub struct SerialExecutor {
    sender: Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    name: String,
}

impl SerialExecutor {
    /// Spawns an executor thread with default settings.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn new() -> io::Result<Self> {
        Self::builder().spawn()
    }

    /// Starts configuring an executor thread.
    #[must_use]
    pub fn builder() -> SerialExecutorBuilder {
        SerialExecutorBuilder::default()
    }

    /// The name of the dispatch thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when called from the dispatch thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops accepting work, runs what is already queued and joins the thread.
    ///
    /// Calling this from a task on the executor itself only signals the stop;
    /// the thread exits once the current task returns.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Stop);
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!(executor = %self.name, "executor thread terminated abnormally");
            }
        }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        if self.sender.send(Message::Run(task)).is_err() {
            tracing::warn!(executor = %self.name, "executor is shut down; task dropped");
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .field("queued", &self.sender.len())
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`SerialExecutor`].
pub struct SerialExecutorBuilder {
    name: String,
    panic_handler: Arc<dyn PanicHandler>,
}

impl Default for SerialExecutorBuilder {
    fn default() -> Self {
        Self {
            name: "understory-executor".to_owned(),
            panic_handler: default_handler(),
        }
    }
}

impl SerialExecutorBuilder {
    /// Sets the dispatch thread name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the handler for panicking tasks.
    #[must_use]
    pub fn panic_handler(mut self, handler: Arc<dyn PanicHandler>) -> Self {
        self.panic_handler = handler;
        self
    }

    /// Spawns the dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(self) -> io::Result<SerialExecutor> {
        let (sender, receiver) = channel::unbounded::<Message>();
        let handler = self.panic_handler;
        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            for message in receiver.iter() {
                match message {
                    Message::Run(task) => isolate(&*handler, PanicOrigin::ExecutorTask, task),
                    Message::Stop => break,
                }
            }
        })?;
        tracing::debug!(executor = %self.name, "executor thread started");
        Ok(SerialExecutor {
            sender,
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
            name: self.name,
        })
    }
}

impl fmt::Debug for SerialExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutorBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A FIFO queue drained explicitly by its owner.
///
/// Models an event loop the embedder pumps, e.g. a UI thread: tasks
/// accumulate until [`run_pending`](Self::run_pending) is called.
pub struct ManualExecutor {
    queue: SegQueue<Task>,
    panic_handler: Arc<dyn PanicHandler>,
}

impl ManualExecutor {
    /// Creates an empty queue that logs panicking tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_panic_handler(default_handler())
    }

    /// Creates an empty queue reporting panicking tasks to `handler`.
    #[must_use]
    pub fn with_panic_handler(handler: Arc<dyn PanicHandler>) -> Self {
        Self {
            queue: SegQueue::new(),
            panic_handler: handler,
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs queued tasks, including ones queued while running, until the
    /// queue is empty. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.queue.pop() {
            isolate(&*self.panic_handler, PanicOrigin::ExecutorTask, task);
            ran += 1;
        }
        ran
    }
}

impl Default for ManualExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, task: Task) {
        self.queue.push(task);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}
