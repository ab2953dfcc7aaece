// src/schedule/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::concurrency::{TaskPool, WaitingTask, WaitingTaskHolder};
use crate::config::PathConfig;
use crate::errors::{Result, SchedError};
use crate::failure::{Outcome, TransitionFailure};
use crate::module::Module;
use crate::principal::PrincipalKey;
use crate::report::Reporter;
use crate::schedule::graph::ModuleGraph;
use crate::schedule::path::{Path, PathSummary};
use crate::schedule::scope::ScopeStatus;
use crate::schedule::shutdown::ShutdownFlag;
use crate::transition::{ContextId, ContextLayout, Transition, TransitionInfo};
use crate::types::StreamId;
use crate::worker::{Worker, WorkerEnv};

/// Runs transitions across every worker and enforces the ordering between
/// global and per-stream transitions.
///
/// Responsibilities:
/// - Own the workers, in topological order of the consumes graph.
/// - Fan a transition out to the workers that want it, or chain job-control
///   transitions through them one at a time.
/// - Walk events down the configured paths, where a rejecting filter ends
///   its path early.
/// - Keep a [`ScopeStatus`] for every open run and lumi so stream work waits
///   for the global begin and the global end waits for every stream.
///
/// Nothing here blocks: every method returns after scheduling and reports
/// completion through the holder it was given.
pub struct Scheduler {
    env: Arc<WorkerEnv>,
    graph: ModuleGraph,
    layout: ContextLayout,
    paths: Vec<Path>,
    scopes: Mutex<HashMap<PrincipalKey, Arc<ScopeStatus>>>,
    shutdown: ShutdownFlag,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("order", &self.graph.order())
            .field("layout", &self.layout)
            .field("paths", &self.paths.len())
            .field("open_scopes", &self.scopes.lock().len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        modules: Vec<Module>,
        layout: ContextLayout,
        reporter: Arc<dyn Reporter>,
        pool: TaskPool,
    ) -> Result<Self> {
        let graph = ModuleGraph::new(&modules)?;

        let mut by_label: HashMap<String, Module> = modules
            .into_iter()
            .map(|m| (m.label().to_string(), m))
            .collect();
        let position: HashMap<&str, usize> = graph
            .order()
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let mut workers = Vec::with_capacity(graph.order().len());
        for (index, label) in graph.order().iter().enumerate() {
            let module = by_label.remove(label).ok_or_else(|| {
                SchedError::ConfigError(format!("duplicate module label '{label}'"))
            })?;
            let deps = graph
                .dependencies_of(label)
                .iter()
                .filter_map(|dep| position.get(dep.as_str()).copied())
                .collect();
            workers.push(Arc::new(Worker::new(index, module, &layout, deps)));
        }

        debug!(order = ?graph.order(), streams = layout.streams, "scheduler built");

        Ok(Self {
            env: Arc::new(WorkerEnv {
                workers,
                reporter,
                pool,
            }),
            graph,
            layout,
            paths: Vec::new(),
            scopes: Mutex::new(HashMap::new()),
            shutdown: ShutdownFlag::new(),
        })
    }

    /// Route events through `paths` instead of the plain fan-out. Event
    /// workers on no path still run for every event.
    pub fn with_paths(mut self, paths: &[PathConfig]) -> Result<Self> {
        let position: HashMap<&str, usize> = self
            .env
            .workers
            .iter()
            .map(|w| (w.label(), w.index()))
            .collect();
        let paths = paths
            .iter()
            .map(|cfg| Path::new(cfg, &position))
            .collect::<Result<Vec<_>>>()?;
        debug!(paths = paths.len(), "event paths configured");
        self.paths = paths;
        Ok(self)
    }

    pub fn path_summaries(&self) -> Vec<PathSummary> {
        self.paths.iter().map(Path::summary).collect()
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.env.workers
    }

    pub fn worker(&self, label: &str) -> Option<&Arc<Worker>> {
        self.env.workers.iter().find(|w| w.label() == label)
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn layout(&self) -> &ContextLayout {
        &self.layout
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.env.reporter
    }

    pub fn pool(&self) -> &TaskPool {
        &self.env.pool
    }

    pub fn shutdown(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Run `info` on every worker that wants it and signal `holder` once
    /// all of them finished. The first failure wins.
    ///
    /// Job-control transitions instead run one worker at a time in
    /// topological order and stop at the first failure.
    pub fn run_all_for(self: &Arc<Self>, info: TransitionInfo, holder: WaitingTaskHolder) {
        trace!(transition = info.kind().name(), principal = %info.principal_key(), "run all");
        if info.kind().is_job_control() {
            self.run_ordered(info, holder, 0);
            return;
        }
        if info.kind() == Transition::Event && !self.paths.is_empty() {
            self.run_paths(info, holder);
            return;
        }
        let task = WaitingTask::new("fan-out", move |outcome| holder.done_waiting(outcome));
        let guard = task.holder();
        for worker in self.env.workers.iter().filter(|w| w.wants(info.kind())) {
            worker.run_transition(&self.env, info.clone(), task.holder());
        }
        drop(guard);
    }

    fn run_ordered(self: &Arc<Self>, info: TransitionInfo, holder: WaitingTaskHolder, from: usize) {
        let next = self
            .env
            .workers
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, w)| w.wants(info.kind()));
        let Some((index, worker)) = next else {
            holder.done_waiting(Ok(()));
            return;
        };

        let this = Arc::clone(self);
        let next_info = info.clone();
        let task = WaitingTask::new("job-control", move |outcome| match outcome {
            Ok(()) => this.run_ordered(next_info, holder, index + 1),
            Err(failure) => holder.done_waiting(Err(failure)),
        });
        worker.run_transition(&self.env, info, task.holder());
    }

    fn run_paths(self: &Arc<Self>, info: TransitionInfo, holder: WaitingTaskHolder) {
        let task = WaitingTask::new("paths", move |outcome| holder.done_waiting(outcome));
        let guard = task.holder();
        for path in 0..self.paths.len() {
            self.run_path(path, 0, info.clone(), task.holder());
        }
        let off_path = self.env.workers.iter().filter(|w| {
            w.wants(Transition::Event) && !self.paths.iter().any(|p| p.contains(w.index()))
        });
        for worker in off_path {
            worker.run_transition(&self.env, info.clone(), task.holder());
        }
        drop(guard);
    }

    fn run_path(self: &Arc<Self>, path: usize, step: usize, info: TransitionInfo, holder: WaitingTaskHolder) {
        let Some(current) = self.paths.get(path) else {
            holder.done_waiting(Ok(()));
            return;
        };
        if step == 0 {
            current.visit();
        }
        let next = current
            .entries()
            .get(step)
            .and_then(|&index| self.env.workers.get(index));
        let Some(worker) = next else {
            current.accept();
            holder.done_waiting(Ok(()));
            return;
        };

        let this = Arc::clone(self);
        let decided = Arc::clone(worker);
        let next_info = info.clone();
        let task = WaitingTask::new("path", move |outcome| match outcome {
            Ok(()) if decided.rejected(&next_info) => {
                trace!(module = decided.label(), principal = %next_info.principal_key(), "path ended by filter");
                holder.done_waiting(Ok(()));
            }
            Ok(()) => this.run_path(path, step + 1, next_info, holder),
            Err(failure) => holder.done_waiting(Err(failure)),
        });
        worker.run_transition(&self.env, info, task.holder());
    }

    /// Register a run or lumi as open. Every stream must later exit it.
    pub fn open_scope(&self, key: PrincipalKey) -> Result<Arc<ScopeStatus>> {
        let mut scopes = self.scopes.lock();
        if scopes.contains_key(&key) {
            return Err(SchedError::Scheduling(format!("{key} is already open")));
        }
        let status = Arc::new(ScopeStatus::new(key, self.layout.streams));
        scopes.insert(key, Arc::clone(&status));
        Ok(status)
    }

    /// Return every worker's record for `context` to `Idle` so a new unit in
    /// a reused slot is never mistaken for the one that last finished there.
    ///
    /// Callers reset only once all work in the context has completed.
    pub fn reset_context(&self, context: ContextId) -> Result<()> {
        for worker in &self.env.workers {
            worker.reset(context)?;
        }
        trace!(%context, "context reset");
        Ok(())
    }

    pub fn scope(&self, key: &PrincipalKey) -> Option<Arc<ScopeStatus>> {
        self.scopes.lock().get(key).cloned()
    }

    pub fn open_scopes(&self) -> usize {
        self.scopes.lock().len()
    }

    fn close_scope(&self, key: &PrincipalKey) {
        self.scopes.lock().remove(key);
    }

    fn missing_scope(&self, info: &TransitionInfo, key: PrincipalKey, holder: WaitingTaskHolder) {
        let failure = TransitionFailure::scheduling_for(info, None, format!("{key} is not open"));
        self.env.reporter.transition_failed(&failure);
        holder.done_waiting(Err(failure.into_ref()));
    }

    /// Global begin of an open run or lumi.
    ///
    /// A lumi begin waits for its run's begin when that run is open here.
    /// When the begin finished (either way) every stream transition gated on
    /// the scope is released with its outcome. Repeated requests coalesce.
    pub fn begin_global(self: &Arc<Self>, info: TransitionInfo, holder: WaitingTaskHolder) {
        let key = info.principal_key();
        let Some(scope) = self.scope(&key) else {
            self.missing_scope(&info, key, holder);
            return;
        };
        let parent = info.parent().and_then(|p| self.scope(&p.key()));

        let this = Arc::clone(self);
        let start = move |gate: Outcome| {
            if let Err(failure) = gate {
                scope.begin_done().done_waiting(Err(Arc::clone(&failure)));
                holder.done_waiting(Err(failure));
                return;
            }
            let begun = WaitingTask::new("global-begin", move |outcome| {
                scope.begin_done().done_waiting(outcome.clone());
                holder.done_waiting(outcome);
            });
            this.run_all_for(info, begun.holder());
        };

        match parent {
            Some(parent) => {
                let gate = WaitingTask::new("parent-begun", start);
                parent.begin_done().add(gate.holder());
            }
            None => start(Ok(())),
        }
    }

    /// Per-stream transition, released only after the global begin of the
    /// scope it belongs to. A failed begin skips the transition and passes
    /// the failure on.
    pub fn run_stream(self: &Arc<Self>, info: TransitionInfo, holder: WaitingTaskHolder) {
        let gate_key = match info.kind() {
            Transition::Event => info.parent().map(|p| p.key()),
            Transition::StreamBeginRun
            | Transition::StreamEndRun
            | Transition::StreamBeginLumi
            | Transition::StreamEndLumi => Some(info.principal_key()),
            _ => None,
        };
        let Some(key) = gate_key else {
            self.run_all_for(info, holder);
            return;
        };
        let Some(scope) = self.scope(&key) else {
            self.missing_scope(&info, key, holder);
            return;
        };

        let this = Arc::clone(self);
        let gate = WaitingTask::new("begin-gate", move |outcome| match outcome {
            Ok(()) => this.run_all_for(info, holder),
            Err(failure) => holder.done_waiting(Err(failure)),
        });
        scope.begin_done().add(gate.holder());
    }

    /// Record that `stream` has no more work on the scope.
    pub fn stream_exit(&self, key: &PrincipalKey, stream: StreamId) -> Result<()> {
        let scope = self
            .scope(key)
            .ok_or_else(|| SchedError::Scheduling(format!("{stream} exited {key}, which is not open")))?;
        scope.stream_exit(stream)
    }

    /// Global end of an open scope, started once its begin finished and
    /// every stream exited. It runs even when the begin failed. The scope is
    /// closed afterwards.
    pub fn end_global(self: &Arc<Self>, info: TransitionInfo, holder: WaitingTaskHolder) {
        let key = info.principal_key();
        let Some(scope) = self.scope(&key) else {
            self.missing_scope(&info, key, holder);
            return;
        };

        let this = Arc::clone(self);
        let ready = WaitingTask::new("streams-done", move |_| {
            let closer = Arc::clone(&this);
            let ended = WaitingTask::new("global-end", move |outcome| {
                closer.close_scope(&key);
                holder.done_waiting(outcome);
            });
            this.run_all_for(info, ended.holder());
        });
        let guard = ready.holder();
        scope.begin_done().add(ready.holder());
        scope.streams_done().add(ready.holder());
        drop(guard);
    }

    /// Global end followed by the matching write transition. The write is
    /// skipped when the end failed.
    pub fn end_global_then_write(
        self: &Arc<Self>,
        end: TransitionInfo,
        write: TransitionInfo,
        holder: WaitingTaskHolder,
    ) {
        let this = Arc::clone(self);
        let ended = WaitingTask::new("end-then-write", move |outcome| match outcome {
            Ok(()) => this.run_all_for(write, holder),
            Err(failure) => holder.done_waiting(Err(failure)),
        });
        self.end_global(end, ended.holder());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::concurrency::{FinalWaitingTask, wait_for};
    use crate::failure::ModuleError;
    use crate::module::Capabilities;
    use crate::principal::{Coordinates, Principal, ProductRegistry, ScopeKind};
    use crate::report::CollectingReporter;
    use crate::transition::ContextId;
    use crate::types::Timestamp;

    type Log = Arc<Mutex<Vec<String>>>;

    fn logging_module(label: &str, caps: Capabilities, log: &Log) -> Module {
        let log = Arc::clone(log);
        let name = label.to_string();
        Module::builder(label, "test")
            .capabilities(caps)
            .on_wanted(move |ctx| {
                log.lock().push(format!("{}:{}", name, ctx.transition().name()));
                Ok(())
            })
            .build()
            .unwrap()
    }

    fn scheduler(modules: Vec<Module>, streams: usize) -> (Arc<Scheduler>, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let sched = Scheduler::new(
            modules,
            ContextLayout::new(streams, 1, 1),
            reporter.clone(),
            TaskPool::current().unwrap(),
        )
        .unwrap();
        (Arc::new(sched), reporter)
    }

    fn run_and_lumi() -> (Arc<Principal>, Arc<Principal>) {
        let registry = ProductRegistry::new();
        let run = registry
            .make_principal(ScopeKind::Run, Coordinates::run(1, Timestamp(1)), None)
            .unwrap();
        let lumi = registry
            .make_principal(ScopeKind::Lumi, Coordinates::lumi(1, 1, Timestamp(1)), Some(Arc::clone(&run)))
            .unwrap();
        (run, lumi)
    }

    fn job_principal() -> Arc<Principal> {
        ProductRegistry::new()
            .make_principal(ScopeKind::Process, Coordinates::process(), None)
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_control_runs_in_order_and_stops_at_first_failure() {
        let log: Log = Arc::default();
        let failing = Module::builder("b", "test")
            .capabilities(Capabilities::all())
            .on(Transition::BeginJob, |_| Err(ModuleError::failed("bad geometry")))
            .build()
            .unwrap();
        let (sched, _) = scheduler(
            vec![
                logging_module("c", Capabilities::all(), &log),
                failing,
                logging_module("a", Capabilities::all(), &log),
            ],
            1,
        );
        let order: Vec<String> = sched.graph().order().to_vec();
        let info = TransitionInfo::job(Transition::BeginJob, job_principal());
        let outcome = wait_for(|h| sched.run_all_for(info, h)).await;

        assert!(outcome.unwrap_err().raised_by("b"));
        let ran: Vec<String> = log.lock().clone();
        let b_pos = order.iter().position(|l| l == "b").unwrap();
        let expected: Vec<String> = order[..b_pos]
            .iter()
            .map(|l| format!("{l}:beginJob"))
            .collect();
        assert_eq!(ran, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_lumi_waits_for_global_begin() {
        let log: Log = Arc::default();
        let (sched, _) = scheduler(vec![logging_module("m", Capabilities::all(), &log)], 1);
        let (run, lumi) = run_and_lumi();
        sched.open_scope(run.key()).unwrap();
        sched.open_scope(lumi.key()).unwrap();

        let stream = FinalWaitingTask::new();
        sched.run_stream(
            TransitionInfo::for_stream(Transition::StreamBeginLumi, Arc::clone(&lumi), StreamId(0)),
            stream.holder(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log.lock().is_empty());

        let global = FinalWaitingTask::new();
        sched.begin_global(
            TransitionInfo::global(Transition::GlobalBeginLumi, Arc::clone(&lumi), ContextId::GlobalLumi(0)),
            global.holder(),
        );
        sched.begin_global(
            TransitionInfo::global(Transition::GlobalBeginRun, Arc::clone(&run), ContextId::GlobalRun(0)),
            global.holder(),
        );
        assert!(global.wait().await.is_ok());
        assert!(stream.wait().await.is_ok());
        assert_eq!(
            *log.lock(),
            ["m:globalBeginRun", "m:globalBeginLumi", "m:streamBeginLumi"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_global_begin_runs_once() {
        let log: Log = Arc::default();
        let (sched, _) = scheduler(vec![logging_module("m", Capabilities::all(), &log)], 2);
        let (run, _) = run_and_lumi();
        sched.open_scope(run.key()).unwrap();

        let fin = FinalWaitingTask::new();
        for _ in 0..3 {
            sched.begin_global(
                TransitionInfo::global(Transition::GlobalBeginRun, Arc::clone(&run), ContextId::GlobalRun(0)),
                fin.holder(),
            );
        }
        assert!(fin.wait().await.is_ok());
        assert_eq!(sched.worker("m").unwrap().call_count(Transition::GlobalBeginRun), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lumi_begin_callers_both_wait_for_the_single_execution() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow = Module::builder("slow", "test")
            .capabilities(Capabilities::all())
            .on(Transition::GlobalBeginLumi, move |_| {
                std::thread::sleep(Duration::from_millis(30));
                flag.store(true, Ordering::Release);
                Ok(())
            })
            .build()
            .unwrap();
        let (sched, _) = scheduler(vec![slow], 2);
        let (_run, lumi) = run_and_lumi();
        sched.open_scope(lumi.key()).unwrap();

        let callers: Vec<_> = (0..2)
            .map(|_| {
                let sched = Arc::clone(&sched);
                let finished = Arc::clone(&finished);
                let info = TransitionInfo::global(
                    Transition::GlobalBeginLumi,
                    Arc::clone(&lumi),
                    ContextId::GlobalLumi(0),
                );
                tokio::spawn(async move {
                    let outcome = wait_for(|h| sched.begin_global(info, h)).await;
                    (outcome.is_ok(), finished.load(Ordering::Acquire))
                })
            })
            .collect();
        for caller in callers {
            assert_eq!(caller.await.unwrap(), (true, true));
        }
        assert_eq!(sched.worker("slow").unwrap().call_count(Transition::GlobalBeginLumi), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_context_lets_the_same_key_run_again() {
        let log: Log = Arc::default();
        let (sched, _) = scheduler(vec![logging_module("m", Capabilities::all(), &log)], 1);
        let (run, _) = run_and_lumi();
        let begin = || TransitionInfo::global(Transition::GlobalBeginRun, Arc::clone(&run), ContextId::GlobalRun(0));

        assert!(wait_for(|h| sched.run_all_for(begin(), h)).await.is_ok());
        assert!(wait_for(|h| sched.run_all_for(begin(), h)).await.is_ok());
        assert_eq!(sched.worker("m").unwrap().call_count(Transition::GlobalBeginRun), 1);

        sched.reset_context(ContextId::GlobalRun(0)).unwrap();
        assert!(wait_for(|h| sched.run_all_for(begin(), h)).await.is_ok());
        assert_eq!(sched.worker("m").unwrap().call_count(Transition::GlobalBeginRun), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn global_end_waits_for_every_stream_then_writes() {
        let log: Log = Arc::default();
        let (sched, _) = scheduler(vec![logging_module("m", Capabilities::all(), &log)], 2);
        let (run, _) = run_and_lumi();
        let key = run.key();
        sched.open_scope(key).unwrap();
        let begin = TransitionInfo::global(Transition::GlobalBeginRun, Arc::clone(&run), ContextId::GlobalRun(0));
        assert!(wait_for(|h| sched.begin_global(begin, h)).await.is_ok());

        let end = FinalWaitingTask::new();
        sched.end_global_then_write(
            TransitionInfo::global(Transition::GlobalEndRun, Arc::clone(&run), ContextId::GlobalRun(0)),
            TransitionInfo::global(Transition::WriteRun, Arc::clone(&run), ContextId::GlobalRun(0)),
            end.holder(),
        );
        sched.stream_exit(&key, StreamId(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lock().len(), 1);

        sched.stream_exit(&key, StreamId(1)).unwrap();
        assert!(end.wait().await.is_ok());
        assert_eq!(
            *log.lock(),
            ["m:globalBeginRun", "m:globalEndRun", "m:writeRun"]
        );
        assert!(sched.scope(&key).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_begin_skips_stream_work() {
        let log: Log = Arc::default();
        let failing = Module::builder("bad", "test")
            .capabilities(Capabilities::all())
            .on(Transition::GlobalBeginRun, |_| Err(ModuleError::failed("no calibration")))
            .build()
            .unwrap();
        let (sched, reporter) = scheduler(vec![failing, logging_module("m", Capabilities::all(), &log)], 1);
        let (run, _) = run_and_lumi();
        sched.open_scope(run.key()).unwrap();

        let begin = TransitionInfo::global(Transition::GlobalBeginRun, Arc::clone(&run), ContextId::GlobalRun(0));
        assert!(wait_for(|h| sched.begin_global(begin, h)).await.is_err());
        let stream = TransitionInfo::for_stream(Transition::StreamBeginRun, Arc::clone(&run), StreamId(0));
        let outcome = wait_for(|h| sched.run_stream(stream, h)).await;

        assert!(outcome.unwrap_err().raised_by("bad"));
        assert!(!log.lock().iter().any(|l| l.ends_with("streamBeginRun")));
        assert_eq!(reporter.failures().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unopened_scope_is_a_scheduling_failure() {
        let (sched, _) = scheduler(vec![logging_module("m", Capabilities::all(), &Log::default())], 1);
        let (run, _) = run_and_lumi();
        let info = TransitionInfo::global(Transition::GlobalBeginRun, run, ContextId::GlobalRun(0));
        let outcome = wait_for(|h| sched.begin_global(info, h)).await;
        assert!(outcome.unwrap_err().is_fatal());
        assert!(sched.open_scope(run_and_lumi().0.key()).is_ok());
        assert!(sched.open_scope(run_and_lumi().0.key()).is_err());
    }
}
