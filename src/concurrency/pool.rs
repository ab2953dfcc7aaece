// src/concurrency/pool.rs

use std::future::Future;

use tokio::runtime::Handle;

use crate::errors::{Result, SchedError};

/// Handle to the shared thread pool that executes scheduled work.
///
/// Streams are not threads: every stream's transitions are tasks queued on
/// this pool, and a task either runs to completion or hands its continuation
/// to a waiting task and returns.
#[derive(Debug, Clone)]
pub struct TaskPool {
    handle: Handle,
}

impl TaskPool {
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Pool of the Tokio runtime the caller is running in.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| SchedError::Scheduling(format!("no task pool available: {e}")))
    }

    /// Queue a task. The task is detached; completion is reported through
    /// waiting tasks, not through the join handle.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(task);
    }
}
