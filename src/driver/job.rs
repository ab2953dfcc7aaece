// src/driver/job.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::concurrency::wait_for;
use crate::conditions::ConditionStats;
use crate::errors::SchedError;
use crate::failure::{FailureRef, Outcome, TransitionFailure};
use crate::principal::{PrincipalKey, ProductRegistry};
use crate::report::JobReport;
use crate::schedule::{Scheduler, ShutdownReason};
use crate::transition::{ContextId, TransitionInfo};
use crate::types::{EventFailurePolicy, StreamId};

/// State of one `run()` shared by the driver and its stream tasks.
pub(crate) struct JobState {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) products: Arc<ProductRegistry>,
    policy: EventFailurePolicy,
    failures: Mutex<Vec<FailureRef>>,
    events: Vec<AtomicU64>,
    stopped: Vec<AtomicBool>,
    skipped: AtomicU64,
}

impl JobState {
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        products: Arc<ProductRegistry>,
        policy: EventFailurePolicy,
    ) -> Self {
        let streams = scheduler.layout().streams;
        Self {
            scheduler,
            products,
            policy,
            failures: Mutex::new(Vec::new()),
            events: (0..streams).map(|_| AtomicU64::new(0)).collect(),
            stopped: (0..streams).map(|_| AtomicBool::new(false)).collect(),
            skipped: AtomicU64::new(0),
        }
    }

    /// No new file, run, lumi or event may start.
    pub(crate) fn stopping(&self) -> bool {
        self.scheduler.shutdown().is_requested()
    }

    /// The stream gave up taking events after a failure. The flag holds for
    /// the rest of the job; the stream still runs its lumi and run
    /// transitions.
    pub(crate) fn stream_stopped(&self, stream: StreamId) -> bool {
        self.stopped
            .get(stream.index())
            .is_some_and(|s| s.load(Ordering::Acquire))
    }

    fn record(&self, failure: &FailureRef) {
        let mut failures = self.failures.lock();
        if !failures.iter().any(|f| Arc::ptr_eq(f, failure)) {
            failures.push(Arc::clone(failure));
        }
    }

    /// Record the outcome of a non-event transition. Any failure stops the job.
    pub(crate) fn note(&self, outcome: &Outcome) -> bool {
        match outcome {
            Ok(()) => true,
            Err(failure) => {
                self.record(failure);
                if self.scheduler.shutdown().request(ShutdownReason::Failure) {
                    warn!(cause = %failure, "stopping after failure");
                }
                false
            }
        }
    }

    /// Record the outcome of one event and apply the event failure policy.
    pub(crate) fn note_event(&self, stream: StreamId, outcome: &Outcome) {
        let Err(failure) = outcome else {
            if let Some(count) = self.events.get(stream.index()) {
                count.fetch_add(1, Ordering::AcqRel);
            }
            return;
        };
        self.record(failure);
        if failure.is_fatal() {
            self.scheduler.shutdown().request(ShutdownReason::Failure);
            return;
        }
        match self.policy {
            EventFailurePolicy::StopStream => {
                if let Some(flag) = self.stopped.get(stream.index()) {
                    flag.store(true, Ordering::Release);
                }
                warn!(stream = stream.0, cause = %failure, "stream takes no more events");
            }
            EventFailurePolicy::Abort => {
                if self.scheduler.shutdown().request(ShutdownReason::Failure) {
                    warn!(cause = %failure, "aborting after event failure");
                }
            }
            EventFailurePolicy::Continue => {}
        }
    }

    /// Events of `lumi` that no stream took. Undealt events after a shutdown
    /// request are not counted.
    pub(crate) fn note_undealt(&self, lumi: &PrincipalKey, count: u64) {
        if count == 0 || self.stopping() {
            return;
        }
        self.skipped.fetch_add(count, Ordering::AcqRel);
        warn!(lumi = %lumi, skipped = count, "events skipped by stopped streams");
    }

    /// A scheduling error raised by the driver itself.
    pub(crate) fn record_error(&self, error: SchedError) {
        let failure = TransitionFailure::scheduling(error.to_string());
        self.scheduler.reporter().transition_failed(&failure);
        self.note(&Err(failure.into_ref()));
    }

    /// Clear the context for a new unit. A failure stops the job.
    pub(crate) fn reset_context(&self, context: ContextId) -> bool {
        match self.scheduler.reset_context(context) {
            Ok(()) => true,
            Err(error) => {
                self.record_error(error);
                false
            }
        }
    }

    pub(crate) fn stream_exit(&self, key: &PrincipalKey, stream: StreamId) {
        if let Err(error) = self.scheduler.stream_exit(key, stream) {
            self.record_error(error);
        }
    }

    /// Run a job-wide or global transition on every worker.
    pub(crate) async fn global(&self, info: TransitionInfo) -> bool {
        let outcome = wait_for(|h| self.scheduler.run_all_for(info, h)).await;
        self.note(&outcome)
    }

    /// Run a per-stream transition once its scope's global begin is done.
    pub(crate) async fn stream(&self, info: TransitionInfo) -> bool {
        let outcome = wait_for(|h| self.scheduler.run_stream(info, h)).await;
        self.note(&outcome)
    }

    pub(crate) fn report(&self, elapsed: Duration, conditions: ConditionStats) -> JobReport {
        JobReport {
            events_per_stream: self.events.iter().map(|e| e.load(Ordering::Acquire)).collect(),
            failures: self.failures.lock().clone(),
            paths: self.scheduler.path_summaries(),
            skipped_events: self.skipped.load(Ordering::Acquire),
            signalled: self.scheduler.shutdown().reason() == Some(ShutdownReason::Signal),
            elapsed,
            conditions,
        }
    }
}
