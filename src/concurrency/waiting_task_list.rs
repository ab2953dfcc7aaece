// src/concurrency/waiting_task_list.rs

//! A latch of holders released together.

use std::fmt;
use std::mem;

use parking_lot::Mutex;

use crate::concurrency::WaitingTaskHolder;
use crate::failure::Outcome;

enum ListState {
    Waiting(Vec<WaitingTaskHolder>),
    Done(Outcome),
}

/// Holders parked until some event happens.
///
/// Once [`done_waiting`](Self::done_waiting) is called every parked holder is
/// signalled with the outcome, and holders added later are signalled
/// immediately. Later `done_waiting` calls are ignored until [`reset`](Self::reset).
pub struct WaitingTaskList {
    state: Mutex<ListState>,
}

impl Default for WaitingTaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitingTaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        match &*state {
            ListState::Waiting(v) => write!(f, "WaitingTaskList(waiting: {})", v.len()),
            ListState::Done(o) => write!(f, "WaitingTaskList(done: ok={})", o.is_ok()),
        }
    }
}

impl WaitingTaskList {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListState::Waiting(Vec::new())),
        }
    }

    /// Park a holder, or signal it right away if the list is already done.
    pub fn add(&self, holder: WaitingTaskHolder) {
        let outcome = {
            let mut state = self.state.lock();
            match &mut *state {
                ListState::Waiting(waiters) => {
                    waiters.push(holder);
                    return;
                }
                ListState::Done(outcome) => outcome.clone(),
            }
        };
        holder.done_waiting(outcome);
    }

    /// Release every parked holder. Returns `false` if the list was already done.
    pub fn done_waiting(&self, outcome: Outcome) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if let ListState::Done(_) = &*state {
                return false;
            }
            mem::replace(&mut *state, ListState::Done(outcome.clone()))
        };
        if let ListState::Waiting(waiters) = previous {
            for holder in waiters {
                holder.done_waiting(outcome.clone());
            }
        }
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.state.lock(), ListState::Done(_))
    }

    /// Re-arm the list for a new unit of work. Parked holders are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if let ListState::Done(_) = &*state {
            *state = ListState::Waiting(Vec::new());
        }
    }
}
