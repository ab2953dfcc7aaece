// src/concurrency/waiting_task.rs

//! Counted completion primitive.
//!
//! A [`WaitingTask`] represents "work remaining before a continuation may
//! run". Every dependent holds a [`WaitingTaskHolder`]; when the last holder
//! signals, the continuation runs exactly once with the merged outcome
//! (success, or the earliest recorded failure).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::failure::{FailureKind, FailureRef, Outcome, TransitionFailure};

type Continuation = Box<dyn FnOnce(Outcome) + Send + 'static>;

struct Inner {
    label: &'static str,
    count: AtomicUsize,
    fired: AtomicBool,
    failure: Mutex<Option<FailureRef>>,
    continuation: Mutex<Option<Continuation>>,
}

/// Shared handle to a pending obligation. Cloning shares the same counter.
#[derive(Clone)]
pub struct WaitingTask {
    inner: Arc<Inner>,
}

impl fmt::Debug for WaitingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingTask")
            .field("label", &self.inner.label)
            .field("outstanding", &self.outstanding())
            .field("fired", &self.has_fired())
            .finish()
    }
}

impl WaitingTask {
    /// Create a task with no dependents yet.
    ///
    /// The continuation runs on whichever thread releases the last dependent.
    /// A task that never gets a dependent never fires, so callers usually take
    /// a guard holder first and drop it once every dependent is registered.
    pub fn new(label: &'static str, continuation: impl FnOnce(Outcome) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                count: AtomicUsize::new(0),
                fired: AtomicBool::new(false),
                failure: Mutex::new(None),
                continuation: Mutex::new(Some(Box::new(continuation))),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Register one more dependent.
    ///
    /// # Panics
    /// If the task already fired; adding work to a finished obligation is a
    /// scheduling bug.
    pub fn add_dependent(&self) {
        let previous = self.inner.count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 && self.inner.fired.load(Ordering::Acquire) {
            panic!(
                "scheduling invariant violated: dependent added to waiting task '{}' after it fired",
                self.inner.label
            );
        }
    }

    /// Register a dependent and hand it out as an RAII holder.
    pub fn holder(&self) -> WaitingTaskHolder {
        WaitingTaskHolder::new(self)
    }

    /// Release one dependent, recording its outcome.
    ///
    /// # Panics
    /// If more dependents are released than were added.
    pub fn notify_done(&self, outcome: Outcome) {
        if let Err(failure) = outcome {
            let mut slot = self.inner.failure.lock();
            if slot.is_none() {
                *slot = Some(failure);
            }
        }

        let released = self
            .inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));

        match released {
            Ok(1) => self.fire(),
            Ok(_) => {}
            Err(_) => panic!(
                "scheduling invariant violated: waiting task '{}' notified more often than it has dependents",
                self.inner.label
            ),
        }
    }

    fn fire(&self) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            panic!(
                "scheduling invariant violated: waiting task '{}' fired twice",
                self.inner.label
            );
        }
        let continuation = self.inner.continuation.lock().take();
        let outcome = match self.inner.failure.lock().take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        };
        if let Some(continuation) = continuation {
            continuation(outcome);
        }
    }

    /// Dependents not yet released.
    pub fn outstanding(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }
}

/// One outstanding dependent of a [`WaitingTask`].
///
/// Signal with [`done_waiting`](Self::done_waiting). Dropping an unsignalled
/// holder reports success, or a failure when the drop happens while the
/// thread is panicking, so a continuation is never lost.
pub struct WaitingTaskHolder {
    task: Option<WaitingTask>,
}

impl fmt::Debug for WaitingTaskHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingTaskHolder")
            .field("task", &self.task.as_ref().map(|t| t.label()))
            .finish()
    }
}

impl WaitingTaskHolder {
    pub fn new(task: &WaitingTask) -> Self {
        task.add_dependent();
        Self {
            task: Some(task.clone()),
        }
    }

    /// Signal completion of this dependent.
    pub fn done_waiting(mut self, outcome: Outcome) {
        if let Some(task) = self.task.take() {
            task.notify_done(outcome);
        }
    }

    pub fn task(&self) -> Option<&WaitingTask> {
        self.task.as_ref()
    }
}

impl Clone for WaitingTaskHolder {
    fn clone(&self) -> Self {
        match &self.task {
            Some(task) => WaitingTaskHolder::new(task),
            None => WaitingTaskHolder { task: None },
        }
    }
}

impl Drop for WaitingTaskHolder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let outcome = if std::thread::panicking() {
                Err(TransitionFailure {
                    kind: FailureKind::Module,
                    ..TransitionFailure::scheduling(format!(
                        "holder of waiting task '{}' dropped while panicking",
                        task.label()
                    ))
                }
                .into_ref())
            } else {
                Ok(())
            };
            task.notify_done(outcome);
        }
    }
}
