// src/report.rs

//! Reporting collaborator.
//!
//! The core hands structured records to a [`Reporter`]; it never formats
//! user-facing text itself. [`JobReport`] is the end-of-job summary the
//! binary turns into an exit status.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, trace, warn};

use crate::conditions::ConditionStats;
use crate::failure::{FailureRef, TransitionFailure};
use crate::principal::Coordinates;
use crate::schedule::PathSummary;
use crate::transition::Transition;
use crate::types::StreamId;

/// One completed module callback.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub module: String,
    pub transition: Transition,
    pub stream: Option<StreamId>,
    pub coordinates: Coordinates,
    pub elapsed: Duration,
    pub ok: bool,
}

/// Sink for failure and timing records. Called from pool threads.
pub trait Reporter: Send + Sync {
    fn transition_failed(&self, failure: &TransitionFailure);

    fn transition_finished(&self, _record: &TransitionRecord) {}
}

/// Emits every record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn transition_failed(&self, failure: &TransitionFailure) {
        let transition = failure.transition.map(Transition::name);
        let stream = failure.stream.map(|s| s.0);
        let run = failure.coordinates.and_then(|c| c.run);
        let lumi = failure.coordinates.and_then(|c| c.lumi);
        let event = failure.coordinates.and_then(|c| c.event);
        let elapsed_ms = failure.elapsed.as_millis() as u64;
        if failure.is_fatal() {
            error!(
                module = failure.module.as_deref(),
                transition, stream, run, lumi, event, elapsed_ms,
                error = %failure.cause,
                "fatal scheduling error"
            );
        } else {
            warn!(
                module = failure.module.as_deref(),
                transition, stream, run, lumi, event, elapsed_ms,
                error = %failure.cause,
                "transition failed"
            );
        }
    }

    fn transition_finished(&self, record: &TransitionRecord) {
        trace!(
            module = %record.module,
            transition = record.transition.name(),
            stream = record.stream.map(|s| s.0),
            run = record.coordinates.run,
            lumi = record.coordinates.lumi,
            event = record.coordinates.event,
            elapsed_ms = record.elapsed.as_millis() as u64,
            ok = record.ok,
            "transition finished"
        );
    }
}

/// Keeps every record in memory and forwards to tracing.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    failures: Mutex<Vec<TransitionFailure>>,
    finished: Mutex<Vec<TransitionRecord>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<TransitionFailure> {
        self.failures.lock().clone()
    }

    pub fn finished(&self) -> Vec<TransitionRecord> {
        self.finished.lock().clone()
    }

    /// Completed callbacks of `module` for `transition`.
    pub fn count(&self, module: &str, transition: Transition) -> usize {
        self.finished
            .lock()
            .iter()
            .filter(|r| r.module == module && r.transition == transition)
            .count()
    }
}

impl Reporter for CollectingReporter {
    fn transition_failed(&self, failure: &TransitionFailure) {
        TracingReporter.transition_failed(failure);
        self.failures.lock().push(failure.clone());
    }

    fn transition_finished(&self, record: &TransitionRecord) {
        self.finished.lock().push(record.clone());
    }
}

/// Summary of a finished job.
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    /// Events fully processed, indexed by stream.
    pub events_per_stream: Vec<u64>,
    /// Failures seen by the driver, earliest first.
    pub failures: Vec<FailureRef>,
    /// Per-path event counts, in configuration order.
    pub paths: Vec<PathSummary>,
    /// Events never dealt because the streams meant to take them had stopped.
    pub skipped_events: u64,
    /// The job was shut down by a signal.
    pub signalled: bool,
    pub elapsed: Duration,
    pub conditions: ConditionStats,
}

impl JobReport {
    pub fn total_events(&self) -> u64 {
        self.events_per_stream.iter().sum()
    }

    pub fn fatal(&self) -> Option<&FailureRef> {
        self.failures.iter().find(|f| f.is_fatal())
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.signalled
    }

    /// Process exit status: 0 success, 1 module failure, 2 fatal scheduling
    /// error, 4 shutdown by signal. Configuration errors (3) never produce a
    /// report.
    pub fn exit_code(&self) -> i32 {
        if self.fatal().is_some() {
            2
        } else if self.signalled {
            4
        } else if !self.failures.is_empty() {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        info!(
            events = self.total_events(),
            streams = self.events_per_stream.len(),
            failures = self.failures.len(),
            skipped = self.skipped_events,
            signalled = self.signalled,
            elapsed_ms = self.elapsed.as_millis() as u64,
            condition_queries = self.conditions.n_set,
            condition_refreshes = self.conditions.n_refresh,
            condition_reconnects = self.conditions.n_reconnect,
            "job finished"
        );
        for path in &self.paths {
            info!(path = %path.name, visited = path.visited, accepted = path.accepted, "path summary");
        }
        if let Some(first) = self.fatal().or_else(|| self.failures.first()) {
            error!(
                module = first.module.as_deref(),
                transition = first.transition.map(Transition::name),
                error = %first.cause,
                "first failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_prefers_fatal_over_module_failures() {
        let mut report = JobReport::default();
        assert_eq!(report.exit_code(), 0);

        let mut module_failure = TransitionFailure::scheduling("x");
        module_failure.kind = crate::failure::FailureKind::Module;
        report.failures.push(module_failure.into_ref());
        assert_eq!(report.exit_code(), 1);

        report.signalled = true;
        assert_eq!(report.exit_code(), 4);

        report.failures.push(TransitionFailure::scheduling("broken").into_ref());
        assert_eq!(report.exit_code(), 2);
    }
}
