// src/schedule/scope.rs

use std::sync::Arc;

use parking_lot::Mutex;

use crate::concurrency::{WaitingTask, WaitingTaskHolder, WaitingTaskList};
use crate::errors::{Result, SchedError};
use crate::principal::PrincipalKey;
use crate::types::StreamId;

/// Ordering gates of one open run or lumi.
///
/// - `begin_done` is released when the global begin finished for every
///   worker; stream transitions on this scope (or its children) wait on it.
/// - Each stream exits the scope exactly once. When all have exited,
///   `streams_done` is released and the global end may start.
pub struct ScopeStatus {
    key: PrincipalKey,
    begin_done: WaitingTaskList,
    streams_done: Arc<WaitingTaskList>,
    exits: Mutex<Vec<Option<WaitingTaskHolder>>>,
}

impl std::fmt::Debug for ScopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeStatus")
            .field("key", &self.key)
            .field("begun", &self.begin_done.is_done())
            .field("streams_done", &self.streams_done.is_done())
            .finish()
    }
}

impl ScopeStatus {
    pub fn new(key: PrincipalKey, streams: usize) -> Self {
        let streams_done = Arc::new(WaitingTaskList::new());
        let release = Arc::clone(&streams_done);
        let task = WaitingTask::new("stream-exits", move |outcome| {
            release.done_waiting(outcome);
        });
        let exits = (0..streams).map(|_| Some(task.holder())).collect();
        Self {
            key,
            begin_done: WaitingTaskList::new(),
            streams_done,
            exits: Mutex::new(exits),
        }
    }

    pub fn key(&self) -> PrincipalKey {
        self.key
    }

    pub fn begin_done(&self) -> &WaitingTaskList {
        &self.begin_done
    }

    pub fn streams_done(&self) -> &WaitingTaskList {
        &self.streams_done
    }

    pub fn is_begun(&self) -> bool {
        self.begin_done.is_done()
    }

    /// Record that `stream` finished all its work on this scope.
    pub fn stream_exit(&self, stream: StreamId) -> Result<()> {
        let holder = {
            let mut exits = self.exits.lock();
            let slot = exits.get_mut(stream.index()).ok_or_else(|| {
                SchedError::Scheduling(format!("{stream} does not exist for {}", self.key))
            })?;
            slot.take().ok_or_else(|| {
                SchedError::Scheduling(format!("{stream} exited {} twice", self.key))
            })?
        };
        holder.done_waiting(Ok(()));
        Ok(())
    }

    pub fn streams_remaining(&self) -> usize {
        self.exits.lock().iter().filter(|e| e.is_some()).count()
    }
}
