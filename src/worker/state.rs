// src/worker/state.rs

//! Per-context state machine of a worker.

use std::fmt;

use crate::concurrency::WaitingTaskHolder;
use crate::failure::{FailureRef, Outcome};
use crate::principal::PrincipalKey;
use crate::transition::{ContextId, Transition, TransitionInfo};

/// State of one context while it holds a transition (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Running,
    Succeeded,
    Failed,
}

/// Public, read-only view of a worker's state in one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl From<Option<RunState>> for WorkerState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => WorkerState::Idle,
            Some(RunState::Running) => WorkerState::Running,
            Some(RunState::Succeeded) => WorkerState::Succeeded,
            Some(RunState::Failed) => WorkerState::Failed,
        }
    }
}

/// Deduplication key: one module callback per (context, transition,
/// principal identity), plus the file ordinal for file notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    pub context: ContextId,
    pub transition: Transition,
    pub principal: PrincipalKey,
    pub file: Option<usize>,
}

impl TransitionKey {
    pub fn of(info: &TransitionInfo) -> Self {
        Self {
            context: info.context(),
            transition: info.kind(),
            principal: info.principal_key(),
            file: info.file_index(),
        }
    }
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {} in {}", self.transition, self.principal, self.context)?;
        if let Some(file) = self.file {
            write!(f, " (file #{file})")?;
        }
        Ok(())
    }
}

/// Result of asking a context record for permission to run.
pub(crate) enum Claim {
    /// The caller owns the execution; its holder is parked with the record.
    Start,
    /// The same key is in flight; the holder was parked with it.
    Attached,
    /// The same key already completed; signal the holder with its outcome.
    Finished(WaitingTaskHolder, Outcome),
    /// A different key is in flight in this context.
    Conflict(WaitingTaskHolder, TransitionKey),
}

#[derive(Default)]
pub(crate) struct ContextRecord {
    state: Option<RunState>,
    key: Option<TransitionKey>,
    outcome: Option<Outcome>,
    waiters: Vec<WaitingTaskHolder>,
    last_failure: Option<FailureRef>,
    /// A filter returned `false` for `key`.
    rejected: bool,
}

impl ContextRecord {
    pub(crate) fn claim(&mut self, key: TransitionKey, holder: WaitingTaskHolder) -> Claim {
        let same_key = self.key == Some(key);
        match self.state {
            Some(RunState::Running) if same_key => {
                self.waiters.push(holder);
                Claim::Attached
            }
            Some(RunState::Running) => match self.key {
                Some(active) => Claim::Conflict(holder, active),
                None => Claim::Conflict(holder, key),
            },
            Some(RunState::Succeeded | RunState::Failed) if same_key => {
                let outcome = self.outcome.clone().unwrap_or(Ok(()));
                Claim::Finished(holder, outcome)
            }
            _ => {
                self.state = Some(RunState::Running);
                self.key = Some(key);
                self.outcome = None;
                self.rejected = false;
                self.waiters.push(holder);
                Claim::Start
            }
        }
    }

    /// Record the outcome and hand back every parked holder.
    pub(crate) fn complete(&mut self, outcome: Outcome, rejected: bool) -> Vec<WaitingTaskHolder> {
        self.rejected = rejected && outcome.is_ok();
        self.state = Some(if outcome.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        });
        if let Err(failure) = &outcome {
            self.last_failure = Some(failure.clone());
        }
        self.outcome = Some(outcome);
        std::mem::take(&mut self.waiters)
    }

    /// Back to `Idle`. A running record cannot be reset.
    pub(crate) fn reset(&mut self) -> bool {
        if self.state == Some(RunState::Running) {
            return false;
        }
        self.state = None;
        self.key = None;
        self.outcome = None;
        self.rejected = false;
        true
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.state.into()
    }

    pub(crate) fn active_key(&self) -> Option<TransitionKey> {
        self.key
    }

    pub(crate) fn last_failure(&self) -> Option<FailureRef> {
        self.last_failure.clone()
    }

    /// `key` finished here and its filter turned the event down.
    pub(crate) fn rejected(&self, key: TransitionKey) -> bool {
        self.key == Some(key) && self.state == Some(RunState::Succeeded) && self.rejected
    }
}
