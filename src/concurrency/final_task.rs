// src/concurrency/final_task.rs

//! Boundary between continuation-passing code and `async` callers.

use tokio::sync::oneshot;

use crate::concurrency::{WaitingTask, WaitingTaskHolder};
use crate::failure::{Outcome, TransitionFailure};

/// A waiting task whose continuation wakes an awaiting caller.
///
/// This is the only place the driver "waits" for a batch of work. Awaiting
/// suspends the calling Tokio task; it never blocks a pool thread.
#[derive(Debug)]
pub struct FinalWaitingTask {
    task: WaitingTask,
    guard: WaitingTaskHolder,
    rx: oneshot::Receiver<Outcome>,
}

impl Default for FinalWaitingTask {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalWaitingTask {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        let task = WaitingTask::new("final", move |outcome| {
            // The receiver may be gone if the caller stopped waiting.
            let _ = tx.send(outcome);
        });
        let guard = task.holder();
        Self { task, guard, rx }
    }

    /// A dependent of this batch.
    pub fn holder(&self) -> WaitingTaskHolder {
        self.task.holder()
    }

    /// Wait until every holder handed out has signalled.
    pub async fn wait(self) -> Outcome {
        let Self { task, guard, rx } = self;
        drop(guard);
        drop(task);
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransitionFailure::scheduling(
                "final waiting task dropped without firing its continuation",
            )
            .into_ref()),
        }
    }
}

/// Run `start` with a fresh holder and wait for it to complete.
pub async fn wait_for(start: impl FnOnce(WaitingTaskHolder)) -> Outcome {
    let fin = FinalWaitingTask::new();
    start(fin.holder());
    fin.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_immediately_without_dependents() {
        let fin = FinalWaitingTask::new();
        assert!(fin.wait().await.is_ok());
    }

    #[tokio::test]
    async fn resolves_after_spawned_holders_finish() {
        let fin = FinalWaitingTask::new();
        for _ in 0..4 {
            let holder = fin.holder();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                holder.done_waiting(Ok(()));
            });
        }
        assert!(fin.wait().await.is_ok());
    }

    #[tokio::test]
    async fn carries_failure_to_the_waiter() {
        let outcome = wait_for(|holder| {
            holder.done_waiting(Err(TransitionFailure::scheduling("boom").into_ref()));
        })
        .await;
        let failure = outcome.expect_err("failure should propagate");
        assert_eq!(failure.cause, "boom");
    }
}
