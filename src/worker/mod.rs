// src/worker/mod.rs

//! Scheduler-facing wrapper around one module.
//!
//! A [`Worker`] owns one [`ContextRecord`](state::ContextRecord) per execution
//! context and guarantees that a module callback runs at most once per
//! [`TransitionKey`]: concurrent requests for the same key attach to the
//! running execution and are all signalled when it completes.
//!
//! The execution of one request proceeds through continuations:
//! claim → prefetch (run the consumed modules for the same key) → acquire
//! (event only, asynchronous) → callback on the pool under the concurrency
//! limiter → finish (record, report, release waiters).

pub mod state;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

pub use state::{TransitionKey, WorkerState};

use crate::concurrency::{ConcurrencyLimiter, TaskPool, WaitingTask, WaitingTaskHolder};
use crate::errors::{Result, SchedError};
use crate::failure::{FailureKind, FailureRef, ModuleError, Outcome, TransitionFailure};
use crate::module::{AcquireContext, CallContext, Module};
use crate::report::{Reporter, TransitionRecord};
use crate::transition::{ContextId, ContextLayout, Transition, TransitionInfo};
use state::{Claim, ContextRecord};

/// Everything a worker needs besides itself: its siblings (for prefetching
/// consumed modules), the reporter and the pool.
pub struct WorkerEnv {
    pub workers: Vec<Arc<Worker>>,
    pub reporter: Arc<dyn Reporter>,
    pub pool: TaskPool,
}

pub struct Worker {
    index: usize,
    label: Arc<str>,
    module: Module,
    limiter: ConcurrencyLimiter,
    deps: Vec<usize>,
    records: HashMap<ContextId, Mutex<ContextRecord>>,
    calls: Vec<AtomicU64>,
    failures: AtomicU64,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("deps", &self.deps)
            .finish()
    }
}

impl Worker {
    /// `deps` are the indices (in the scheduler's worker list) of the modules
    /// this one consumes.
    pub fn new(index: usize, module: Module, layout: &ContextLayout, deps: Vec<usize>) -> Self {
        let records = layout
            .contexts()
            .map(|ctx| (ctx, Mutex::new(ContextRecord::default())))
            .collect();
        Self {
            index,
            label: Arc::from(module.label()),
            limiter: ConcurrencyLimiter::new(module.concurrency()),
            module,
            deps,
            records,
            calls: Transition::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
            failures: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn wants(&self, t: Transition) -> bool {
        self.module.wants(t)
    }

    pub fn state(&self, context: ContextId) -> Option<WorkerState> {
        self.records.get(&context).map(|r| r.lock().state())
    }

    pub fn last_failure(&self, context: ContextId) -> Option<FailureRef> {
        self.records.get(&context).and_then(|r| r.lock().last_failure())
    }

    /// Number of times the module was invoked for `t`.
    pub fn call_count(&self, t: Transition) -> u64 {
        self.calls[t.index()].load(Ordering::Acquire)
    }

    /// Failures raised by this module.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// The module is a filter and turned down the event `info` describes.
    ///
    /// Only meaningful once the transition for `info` has completed.
    pub fn rejected(&self, info: &TransitionInfo) -> bool {
        self.module.is_filter()
            && info.kind() == Transition::Event
            && self
                .records
                .get(&info.context())
                .is_some_and(|r| r.lock().rejected(TransitionKey::of(info)))
    }

    /// Return a finished context to `Idle`.
    pub fn reset(&self, context: ContextId) -> Result<()> {
        let record = self.records.get(&context).ok_or_else(|| {
            SchedError::Scheduling(format!("worker '{}' has no state for {context}", self.label))
        })?;
        if record.lock().reset() {
            Ok(())
        } else {
            Err(SchedError::Scheduling(format!(
                "worker '{}' cannot reset {context} while a transition is running",
                self.label
            )))
        }
    }

    /// Run the module for `info` and signal `holder` when done.
    ///
    /// Modules that do not want the transition complete immediately.
    pub fn run_transition(
        self: &Arc<Self>,
        env: &Arc<WorkerEnv>,
        info: TransitionInfo,
        holder: WaitingTaskHolder,
    ) {
        if !self.wants(info.kind()) {
            holder.done_waiting(Ok(()));
            return;
        }

        let key = TransitionKey::of(&info);
        let Some(record) = self.records.get(&info.context()) else {
            let failure = TransitionFailure::scheduling_for(
                &info,
                Some(self.label()),
                format!("no state record for {}", info.context()),
            );
            env.reporter.transition_failed(&failure);
            holder.done_waiting(Err(failure.into_ref()));
            return;
        };

        let claim = record.lock().claim(key, holder);
        match claim {
            Claim::Start => {}
            Claim::Attached => {
                trace!(module = %self.label, %key, "attached to running transition");
                return;
            }
            Claim::Finished(holder, outcome) => {
                trace!(module = %self.label, %key, "transition already finished");
                holder.done_waiting(outcome);
                return;
            }
            Claim::Conflict(holder, active) => {
                let failure = TransitionFailure::scheduling_for(
                    &info,
                    Some(self.label()),
                    format!("{key} requested while {active} is still running"),
                );
                env.reporter.transition_failed(&failure);
                holder.done_waiting(Err(failure.into_ref()));
                return;
            }
        }

        self.prefetch(env, info);
    }

    fn prefetch(self: &Arc<Self>, env: &Arc<WorkerEnv>, info: TransitionInfo) {
        if self.deps.is_empty() {
            self.after_prefetch(env, info, Ok(()));
            return;
        }
        let this = Arc::clone(self);
        let task_env = Arc::clone(env);
        let task_info = info.clone();
        let task = WaitingTask::new("prefetch", move |outcome| {
            this.after_prefetch(&task_env, task_info, outcome)
        });
        let guard = task.holder();
        for &dep in &self.deps {
            if let Some(worker) = env.workers.get(dep) {
                worker.run_transition(env, info.clone(), task.holder());
            }
        }
        drop(guard);
    }

    fn after_prefetch(self: &Arc<Self>, env: &Arc<WorkerEnv>, info: TransitionInfo, upstream: Outcome) {
        if let Err(failure) = upstream {
            debug!(module = %self.label, cause = %failure, "skipping after upstream failure");
            self.finish(env, &info, Err(failure), false);
            return;
        }
        match self.module.acquire_handler() {
            Some(acquire) if info.kind() == Transition::Event => {
                let acquire = Arc::clone(acquire);
                self.acquire(env, info, acquire);
            }
            _ => self.schedule_call(env, info),
        }
    }

    fn acquire(
        self: &Arc<Self>,
        env: &Arc<WorkerEnv>,
        info: TransitionInfo,
        acquire: crate::module::AcquireHandler,
    ) {
        let this = Arc::clone(self);
        let task_env = Arc::clone(env);
        let task_info = info.clone();
        let task = WaitingTask::new("acquire", move |outcome| match outcome {
            Ok(()) => this.schedule_call(&task_env, task_info),
            Err(failure) => this.finish(&task_env, &task_info, Err(failure), false),
        });
        let guard = task.holder();
        let ctx = AcquireContext::new(info.clone(), Arc::clone(&self.label), env.pool.clone());
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| acquire(ctx, task.holder())));
        match result {
            Ok(()) => drop(guard),
            Err(payload) => {
                let error = ModuleError::Panic(panic_message(payload.as_ref()));
                let failure = TransitionFailure::module(&self.label, &info, &error, started.elapsed());
                guard.done_waiting(Err(failure.into_ref()));
            }
        }
    }

    fn schedule_call(self: &Arc<Self>, env: &Arc<WorkerEnv>, info: TransitionInfo) {
        let this = Arc::clone(self);
        let env = Arc::clone(env);
        let pool = env.pool.clone();
        pool.spawn(async move {
            let _permit = this.limiter.acquire().await;
            let (outcome, rejected) = this.invoke(&env, &info);
            this.finish(&env, &info, outcome, rejected);
        });
    }

    /// Run the callback. The flag is set when a filter rejected the event.
    fn invoke(&self, env: &WorkerEnv, info: &TransitionInfo) -> (Outcome, bool) {
        let kind = info.kind();
        self.calls[kind.index()].fetch_add(1, Ordering::AcqRel);
        let started = Instant::now();
        let ctx = CallContext::new(info, &self.label, self.module.produces());
        let result = match (kind, self.module.filter_handler()) {
            (Transition::Event, Some(filter)) => guarded(|| filter(&ctx)),
            _ => match self.module.handler(kind) {
                None => Ok(true),
                Some(handler) => guarded(|| handler(&ctx).map(|()| true)),
            },
        };
        let elapsed = started.elapsed();
        env.reporter.transition_finished(&TransitionRecord {
            module: self.label.to_string(),
            transition: kind,
            stream: info.stream(),
            coordinates: *info.principal().coordinates(),
            elapsed,
            ok: result.is_ok(),
        });
        match result {
            Ok(accepted) => {
                if !accepted {
                    trace!(module = %self.label, principal = %info.principal_key(), "event rejected");
                }
                (Ok(()), !accepted)
            }
            Err(error) => (
                Err(TransitionFailure::module(&self.label, info, &error, elapsed).into_ref()),
                false,
            ),
        }
    }

    fn finish(&self, env: &WorkerEnv, info: &TransitionInfo, outcome: Outcome, rejected: bool) {
        let outcome = match outcome {
            Err(failure) if failure.kind == FailureKind::Module && failure.module.is_none() => {
                let error = ModuleError::Panic(failure.cause.clone());
                Err(TransitionFailure::module(&self.label, info, &error, failure.elapsed).into_ref())
            }
            other => other,
        };
        if let Err(failure) = &outcome {
            if failure.raised_by(&self.label) {
                self.failures.fetch_add(1, Ordering::AcqRel);
                env.reporter.transition_failed(failure);
            }
        }

        let waiters = match self.records.get(&info.context()) {
            Some(record) => record.lock().complete(outcome.clone(), rejected),
            None => Vec::new(),
        };
        for holder in waiters {
            holder.done_waiting(outcome.clone());
        }
    }
}

/// Run a module callback, turning a panic into a module error.
fn guarded<T>(call: impl FnOnce() -> std::result::Result<T, ModuleError>) -> std::result::Result<T, ModuleError> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(ModuleError::Panic(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::concurrency::{FinalWaitingTask, wait_for};
    use crate::module::Capabilities;
    use crate::principal::{Coordinates, ProductRegistry, ScopeKind};
    use crate::report::CollectingReporter;
    use crate::types::Timestamp;

    fn env_with(modules: Vec<(Module, Vec<usize>)>, reporter: Arc<CollectingReporter>) -> Arc<WorkerEnv> {
        let layout = ContextLayout::new(1, 1, 1);
        let workers = modules
            .into_iter()
            .enumerate()
            .map(|(i, (m, deps))| Arc::new(Worker::new(i, m, &layout, deps)))
            .collect();
        Arc::new(WorkerEnv {
            workers,
            reporter,
            pool: TaskPool::current().unwrap(),
        })
    }

    fn run_info(run: u32) -> TransitionInfo {
        let principal = ProductRegistry::new()
            .make_principal(ScopeKind::Run, Coordinates::run(run, Timestamp(1)), None)
            .unwrap();
        TransitionInfo::global(Transition::GlobalBeginRun, principal, ContextId::GlobalRun(0))
    }

    fn slow_module(label: &str, caps: Capabilities) -> Module {
        Module::builder(label, "test")
            .capabilities(caps)
            .on_wanted(|_| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_for_one_key_run_once() {
        let reporter = Arc::new(CollectingReporter::new());
        let env = env_with(vec![(slow_module("w", Capabilities::all()), vec![])], reporter);
        let worker = Arc::clone(&env.workers[0]);
        let info = run_info(1);

        let fin = FinalWaitingTask::new();
        for _ in 0..4 {
            worker.run_transition(&env, info.clone(), fin.holder());
        }
        assert!(fin.wait().await.is_ok());
        assert_eq!(worker.call_count(Transition::GlobalBeginRun), 1);
        assert_eq!(worker.state(ContextId::GlobalRun(0)), Some(WorkerState::Succeeded));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn filter_decision_is_kept_per_event() {
        use crate::types::{EventId, StreamId};

        let sel = Module::builder("sel", "test")
            .capabilities(Capabilities::events_only())
            .filter(|ctx| Ok(ctx.principal().coordinates().event.is_some_and(|e| e % 2 == 0)))
            .build()
            .unwrap();
        let env = env_with(vec![(sel, vec![])], Arc::new(CollectingReporter::new()));
        let worker = Arc::clone(&env.workers[0]);

        let registry = ProductRegistry::new();
        let run = registry
            .make_principal(ScopeKind::Run, Coordinates::run(1, Timestamp(1)), None)
            .unwrap();
        let lumi = registry
            .make_principal(ScopeKind::Lumi, Coordinates::lumi(1, 1, Timestamp(1)), Some(Arc::clone(&run)))
            .unwrap();
        let event = |n| {
            let id = EventId { run: 1, lumi: 1, event: n };
            let principal = registry
                .make_principal(ScopeKind::Event, Coordinates::event(id, Timestamp(1)), Some(Arc::clone(&lumi)))
                .unwrap();
            TransitionInfo::for_stream(Transition::Event, principal, StreamId(0))
        };

        let odd = event(1);
        assert!(wait_for(|h| worker.run_transition(&env, odd.clone(), h)).await.is_ok());
        assert!(worker.rejected(&odd));

        let even = event(2);
        assert!(wait_for(|h| worker.run_transition(&env, even.clone(), h)).await.is_ok());
        assert!(!worker.rejected(&even));
        assert!(!worker.rejected(&odd));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unwanted_transition_is_a_no_op() {
        let reporter = Arc::new(CollectingReporter::new());
        let env = env_with(
            vec![(slow_module("w", Capabilities::events_only()), vec![])],
            reporter,
        );
        let worker = Arc::clone(&env.workers[0]);
        let outcome = wait_for(|h| worker.run_transition(&env, run_info(1), h)).await;
        assert!(outcome.is_ok());
        assert_eq!(worker.call_count(Transition::GlobalBeginRun), 0);
        assert_eq!(worker.state(ContextId::GlobalRun(0)), Some(WorkerState::Idle));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn upstream_failure_skips_consumer_and_is_reported_once() {
        let failing = Module::builder("producer", "test")
            .capabilities(Capabilities::all())
            .on(Transition::GlobalBeginRun, |_| Err(ModuleError::failed("no beam")))
            .build()
            .unwrap();
        let reporter = Arc::new(CollectingReporter::new());
        let env = env_with(
            vec![
                (failing, vec![]),
                (slow_module("consumer", Capabilities::all()), vec![0]),
            ],
            reporter.clone(),
        );
        let consumer = Arc::clone(&env.workers[1]);
        let outcome = wait_for(|h| consumer.run_transition(&env, run_info(1), h)).await;

        let failure = outcome.unwrap_err();
        assert!(failure.raised_by("producer"));
        assert_eq!(consumer.call_count(Transition::GlobalBeginRun), 0);
        assert_eq!(consumer.state(ContextId::GlobalRun(0)), Some(WorkerState::Failed));
        assert_eq!(reporter.failures().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_callback_becomes_a_failure() {
        let module = Module::builder("panicky", "test")
            .capabilities(Capabilities::all())
            .on(Transition::GlobalBeginRun, |_| panic!("detector on fire"))
            .build()
            .unwrap();
        let reporter = Arc::new(CollectingReporter::new());
        let env = env_with(vec![(module, vec![])], reporter.clone());
        let worker = Arc::clone(&env.workers[0]);
        let outcome = wait_for(|h| worker.run_transition(&env, run_info(1), h)).await;

        let failure = outcome.unwrap_err();
        assert!(failure.cause.contains("detector on fire"));
        assert_eq!(worker.failure_count(), 1);
        assert_eq!(reporter.failures().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn different_key_while_running_is_a_scheduling_failure() {
        let reporter = Arc::new(CollectingReporter::new());
        let env = env_with(vec![(slow_module("w", Capabilities::all()), vec![])], reporter);
        let worker = Arc::clone(&env.workers[0]);

        let fin = FinalWaitingTask::new();
        worker.run_transition(&env, run_info(1), fin.holder());
        let clash = wait_for(|h| worker.run_transition(&env, run_info(2), h)).await;
        assert!(clash.unwrap_err().is_fatal());
        assert!(fin.wait().await.is_ok());
        assert!(worker.reset(ContextId::GlobalRun(0)).is_ok());
        assert_eq!(worker.state(ContextId::GlobalRun(0)), Some(WorkerState::Idle));
    }
}
