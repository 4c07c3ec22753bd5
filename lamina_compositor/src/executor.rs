// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Running closures on the main thread.
//!
//! Any thread may [`submit`](ExecutorHandle::submit) a closure over the
//! main-thread state `S`. The main thread drains submissions once per loop
//! iteration and runs them in order. Each submission returns a
//! [`TaskResult`] that a non-main thread may block on.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, ThreadId};

use lamina_core::error::IngressError;
use lamina_core::transaction::WakeHook;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::trace;

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A task result could not be obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum WaitError {
    /// Blocking on the main thread would deadlock the loop that runs the
    /// task.
    #[error("blocking wait on the main thread")]
    MainThread,
    /// The executor was dropped before the task ran.
    #[error("task dropped before it ran")]
    Abandoned,
}

enum SlotState<R> {
    Pending,
    Ready(R),
    Abandoned,
    Taken,
}

struct Slot<R> {
    state: Mutex<SlotState<R>>,
    ready: Condvar,
}

impl<R> Slot<R> {
    fn set(&self, state: SlotState<R>) {
        *self.state.lock() = state;
        self.ready.notify_all();
    }
}

/// Fills a slot exactly once; marks it abandoned if dropped unfilled.
struct Completer<R> {
    slot: Option<Arc<Slot<R>>>,
}

impl<R> Completer<R> {
    fn complete(mut self, value: R) {
        if let Some(slot) = self.slot.take() {
            slot.set(SlotState::Ready(value));
        }
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.set(SlotState::Abandoned);
        }
    }
}

/// The eventual result of a submitted task.
pub struct TaskResult<R> {
    slot: Arc<Slot<R>>,
    main_thread: ThreadId,
}

impl<R> fmt::Debug for TaskResult<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl<R> TaskResult<R> {
    /// Whether the task has run (or was abandoned).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }

    /// Takes the result if the task has run.
    pub fn try_take(&self) -> Option<R> {
        let mut state = self.slot.state.lock();
        if !matches!(*state, SlotState::Ready(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Blocks until the task has run.
    ///
    /// # Errors
    ///
    /// [`WaitError::MainThread`] when called on the main thread, and
    /// [`WaitError::Abandoned`] if the task will never run or its result was
    /// already taken.
    pub fn wait(self) -> Result<R, WaitError> {
        if thread::current().id() == self.main_thread {
            return Err(WaitError::MainThread);
        }
        let mut state = self.slot.state.lock();
        while matches!(*state, SlotState::Pending) {
            self.slot.ready.wait(&mut state);
        }
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(value) => Ok(value),
            _ => Err(WaitError::Abandoned),
        }
    }
}

/// Submits tasks to a [`MainThreadExecutor`] from any thread.
pub struct ExecutorHandle<S> {
    tx: mpsc::Sender<Task<S>>,
    main_thread: ThreadId,
    wake: Arc<Mutex<Option<WakeHook>>>,
}

impl<S> Clone for ExecutorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            main_thread: self.main_thread,
            wake: Arc::clone(&self.wake),
        }
    }
}

impl<S> fmt::Debug for ExecutorHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("main_thread", &self.main_thread)
            .finish_non_exhaustive()
    }
}

impl<S> ExecutorHandle<S> {
    /// Queues `task` to run on the main thread.
    ///
    /// # Errors
    ///
    /// Fails once the executor has been dropped.
    pub fn submit<R, F>(&self, task: F) -> Result<TaskResult<R>, IngressError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        });
        let completer = Completer {
            slot: Some(Arc::clone(&slot)),
        };
        let boxed: Task<S> = Box::new(move |state: &mut S| completer.complete(task(state)));
        self.tx
            .send(boxed)
            .map_err(|_| IngressError("main thread tasks"))?;
        let wake = self.wake.lock().clone();
        if let Some(wake) = wake {
            wake();
        }
        Ok(TaskResult {
            slot,
            main_thread: self.main_thread,
        })
    }

    /// Queues `task` and blocks until it has run.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit) and [`TaskResult::wait`].
    pub fn run_blocking<R, F>(&self, task: F) -> Result<R, WaitError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        if thread::current().id() == self.main_thread {
            return Err(WaitError::MainThread);
        }
        self.submit(task)
            .map_err(|_| WaitError::Abandoned)?
            .wait()
    }
}

/// Tasks drained from the executor, ready to run.
#[must_use = "drained tasks are abandoned unless run"]
pub struct PendingTasks<S> {
    tasks: Vec<Task<S>>,
}

impl<S> fmt::Debug for PendingTasks<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTasks")
            .field("len", &self.tasks.len())
            .finish()
    }
}

impl<S> PendingTasks<S> {
    /// Runs every task in submission order. Returns how many ran.
    pub fn run(self, state: &mut S) -> usize {
        let count = self.tasks.len();
        for task in self.tasks {
            task(state);
        }
        if count > 0 {
            trace!(count, "main thread tasks ran");
        }
        count
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing was drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Single-threaded executor bound to the thread that created it.
pub struct MainThreadExecutor<S> {
    tx: mpsc::Sender<Task<S>>,
    rx: mpsc::Receiver<Task<S>>,
    main_thread: ThreadId,
    wake: Arc<Mutex<Option<WakeHook>>>,
}

impl<S> fmt::Debug for MainThreadExecutor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadExecutor")
            .field("main_thread", &self.main_thread)
            .finish_non_exhaustive()
    }
}

impl<S> Default for MainThreadExecutor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MainThreadExecutor<S> {
    /// Creates an executor whose main thread is the calling thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            main_thread: thread::current().id(),
            wake: Arc::new(Mutex::new(None)),
        }
    }

    /// A new submission handle.
    #[must_use]
    pub fn handle(&self) -> ExecutorHandle<S> {
        ExecutorHandle {
            tx: self.tx.clone(),
            main_thread: self.main_thread,
            wake: Arc::clone(&self.wake),
        }
    }

    /// Installs the hook run after every submission.
    pub fn set_wake_hook(&self, hook: WakeHook) {
        *self.wake.lock() = Some(hook);
    }

    /// Takes every queued task without blocking.
    pub fn drain(&self) -> PendingTasks<S> {
        PendingTasks {
            tasks: self.rx.try_iter().collect(),
        }
    }

    /// Waits up to `timeout` for a first task, then takes every queued task.
    pub fn wait_for_tasks(&self, timeout: std::time::Duration) -> PendingTasks<S> {
        let mut tasks = Vec::new();
        if let Ok(first) = self.rx.recv_timeout(timeout) {
            tasks.push(first);
            tasks.extend(self.rx.try_iter());
        }
        PendingTasks { tasks }
    }
}
