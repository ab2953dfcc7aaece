// src/driver/mod.rs

//! Job driver.
//!
//! [`EventProcessor`] walks the job description (files, runs, lumis, events)
//! and issues every transition through the [`Scheduler`] in the order the
//! framework guarantees:
//!
//! beginJob, beginStream (each stream), beginProcessBlock, then per file
//! openInputFile and its runs, closeInputFile; endProcessBlock, endStream,
//! endJob.
//!
//! Per run: global begin, stream begins, lumis, stream ends, global end,
//! write. Per lumi: global begin, then every stream concurrently (stream
//! begin, events, stream end), then global end and write. Up to
//! `concurrent_lumis` lumi ends (and `concurrent_runs` run ends) stay in
//! flight while the next unit starts.

pub mod job;
pub mod source;
pub mod stream;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::concurrency::{FinalWaitingTask, TaskPool};
use crate::conditions::{ConditionCache, source_from_config};
use crate::config::{JobConfig, ProcessSection, RunConfig, SourceSection};
use crate::errors::{Result, SchedError};
use crate::module::ModuleRegistry;
use crate::module::builtin::SOURCE_PRODUCT;
use crate::principal::{Coordinates, Principal, PrincipalSlot, ProductId, ProductRegistry, ScopeKind};
use crate::report::{JobReport, Reporter};
use crate::schedule::{Scheduler, ShutdownFlag};
use crate::transition::{ContextId, ContextLayout, Transition, TransitionInfo};
use crate::types::{StreamId, SyncValue, Timestamp};

use job::JobState;
pub use source::{EventDealer, EventNumberReader};
use stream::{LumiWork, stream_lumi};

pub struct EventProcessor {
    scheduler: Arc<Scheduler>,
    products: Arc<ProductRegistry>,
    conditions: ConditionCache,
    reader: Arc<EventNumberReader>,
    process: ProcessSection,
    source: SourceSection,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("process", &self.process.name)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl EventProcessor {
    /// Build modules, product layout, workers and the condition source.
    pub fn from_config(
        cfg: &JobConfig,
        registry: &ModuleRegistry,
        reporter: Arc<dyn Reporter>,
        pool: TaskPool,
    ) -> Result<Self> {
        let modules = cfg
            .modules
            .iter()
            .map(|m| registry.make(m))
            .collect::<Result<Vec<_>>>()?;

        let reader = Arc::new(EventNumberReader::default());
        let mut products = ProductRegistry::new();
        products.register_source(ScopeKind::Event, ProductId::new(SOURCE_PRODUCT), reader.clone())?;
        for module in &modules {
            for (scope, id) in module.produces() {
                products.register_produced(*scope, id.clone(), module.label())?;
            }
        }

        let layout = ContextLayout::new(
            cfg.process.streams,
            cfg.process.concurrent_runs,
            cfg.process.concurrent_lumis,
        );
        let scheduler = Scheduler::new(modules, layout, reporter, pool)?.with_paths(&cfg.paths)?;
        let conditions = ConditionCache::new(Arc::new(source_from_config(&cfg.conditions)));

        Ok(Self {
            scheduler: Arc::new(scheduler),
            products: Arc::new(products),
            conditions,
            reader,
            process: cfg.process.clone(),
            source: cfg.source.clone(),
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn shutdown(&self) -> &ShutdownFlag {
        self.scheduler.shutdown()
    }

    pub fn products(&self) -> &ProductRegistry {
        &self.products
    }

    /// Source products read so far.
    pub fn source_reads(&self) -> u64 {
        self.reader.reads()
    }

    /// Process the whole job. Failures end up in the report; this never
    /// returns early without running `endJob`.
    pub async fn run(&self) -> JobReport {
        let started = Instant::now();
        let job = Arc::new(JobState::new(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.products),
            self.process.on_event_failure,
        ));
        info!(
            process = %self.process.name,
            streams = self.layout().streams,
            modules = self.scheduler.workers().len(),
            files = self.source.files.len(),
            "job starting"
        );

        match self
            .products
            .make_principal(ScopeKind::Process, Coordinates::process(), None)
        {
            Ok(process) => self.run_job(&job, process).await,
            Err(error) => job.record_error(error),
        }

        let report = job.report(started.elapsed(), self.conditions.source().stats());
        report.log_summary();
        report
    }

    fn layout(&self) -> &ContextLayout {
        self.scheduler.layout()
    }

    async fn run_job(&self, job: &Arc<JobState>, process: Arc<Principal>) {
        let job_info = |kind| TransitionInfo::job(kind, Arc::clone(&process));

        if job.global(job_info(Transition::BeginJob)).await {
            if self.all_streams(job, Transition::BeginStream, &process).await {
                if job.global(job_info(Transition::BeginProcessBlock)).await {
                    self.process_files(job, &process).await;
                }
                job.global(job_info(Transition::EndProcessBlock)).await;
            }
            self.all_streams(job, Transition::EndStream, &process).await;
        }
        job.global(job_info(Transition::EndJob)).await;
    }

    async fn all_streams(&self, job: &JobState, kind: Transition, principal: &Arc<Principal>) -> bool {
        let fin = FinalWaitingTask::new();
        for stream in self.layout().stream_ids() {
            let info = TransitionInfo::for_stream(kind, Arc::clone(principal), stream);
            self.scheduler.run_stream(info, fin.holder());
        }
        job.note(&fin.wait().await)
    }

    async fn process_files(&self, job: &Arc<JobState>, process: &Arc<Principal>) {
        let mut cursor = Cursor::new(self.source.first_timestamp, self.layout().streams);
        for (index, file) in self.source.files.iter().enumerate() {
            if job.stopping() {
                break;
            }
            let file_info = |kind| {
                TransitionInfo::job(kind, Arc::clone(process)).with_file(index, file.name.as_str())
            };
            if !job.global(file_info(Transition::OpenInputFile)).await {
                continue;
            }
            debug!(file = %file.name, runs = file.runs.len(), "file opened");

            let mut runs = PendingEnds::new(self.process.concurrent_runs);
            for run in &file.runs {
                if job.stopping() {
                    break;
                }
                runs.make_room(job).await;
                if let Some(end) = self.process_run(job, run, &mut cursor).await {
                    runs.push(end);
                }
            }
            runs.drain(job).await;

            job.global(file_info(Transition::CloseInputFile)).await;
        }
    }

    async fn process_run(
        &self,
        job: &Arc<JobState>,
        cfg: &RunConfig,
        cursor: &mut Cursor,
    ) -> Option<FinalWaitingTask> {
        let (ordinal, time) = cursor.next_run();
        let run = match self
            .products
            .make_principal(ScopeKind::Run, Coordinates::run(cfg.run, time), None)
        {
            Ok(run) => run,
            Err(error) => {
                job.record_error(error);
                return None;
            }
        };
        let context = self.layout().run_context(ordinal);
        let reset = job.reset_context(context)
            && self
                .layout()
                .stream_ids()
                .all(|stream| job.reset_context(ContextId::Stream(stream)));
        if !reset {
            return None;
        }
        let key = run.key();
        if let Err(error) = self.scheduler.open_scope(key) {
            job.record_error(error);
            return None;
        }

        let snapshot = self.conditions.synchronize(SyncValue::new(cfg.run, 0, time));
        let global = |kind| {
            TransitionInfo::global(kind, Arc::clone(&run), context)
                .with_conditions(Some(Arc::clone(&snapshot)))
        };
        let per_stream = |kind, stream| {
            TransitionInfo::for_stream(kind, Arc::clone(&run), stream)
                .with_conditions(Some(Arc::clone(&snapshot)))
        };

        let begin = FinalWaitingTask::new();
        self.scheduler.begin_global(global(Transition::GlobalBeginRun), begin.holder());
        let begun = job.note(&begin.wait().await);
        debug!(run = cfg.run, ok = begun, "run begun");

        let streams_begun = self.each_stream(job, |s| per_stream(Transition::StreamBeginRun, s)).await;

        if begun && streams_begun {
            let mut lumis = PendingEnds::new(self.process.concurrent_lumis);
            for lumi in 1..=cfg.lumis {
                if job.stopping() {
                    break;
                }
                lumis.make_room(job).await;
                if let Some(end) = self.process_lumi(job, &run, cfg, lumi, cursor).await {
                    lumis.push(end);
                }
            }
            lumis.drain(job).await;
        }

        self.each_stream(job, |s| per_stream(Transition::StreamEndRun, s)).await;
        for stream in self.layout().stream_ids() {
            job.stream_exit(&key, stream);
        }

        let end = FinalWaitingTask::new();
        self.scheduler.end_global_then_write(
            global(Transition::GlobalEndRun),
            global(Transition::WriteRun),
            end.holder(),
        );
        Some(end)
    }

    async fn each_stream(&self, job: &JobState, info: impl Fn(StreamId) -> TransitionInfo) -> bool {
        let fin = FinalWaitingTask::new();
        for stream in self.layout().stream_ids() {
            self.scheduler.run_stream(info(stream), fin.holder());
        }
        job.note(&fin.wait().await)
    }

    async fn process_lumi(
        &self,
        job: &Arc<JobState>,
        run: &Arc<Principal>,
        cfg: &RunConfig,
        number: u32,
        cursor: &mut Cursor,
    ) -> Option<FinalWaitingTask> {
        let (ordinal, time) = cursor.next_lumi();
        let lumi = match self.products.make_principal(
            ScopeKind::Lumi,
            Coordinates::lumi(cfg.run, number, time),
            Some(Arc::clone(run)),
        ) {
            Ok(lumi) => lumi,
            Err(error) => {
                job.record_error(error);
                return None;
            }
        };
        let context = self.layout().lumi_context(ordinal);
        if !job.reset_context(context) {
            return None;
        }
        let key = lumi.key();
        if let Err(error) = self.scheduler.open_scope(key) {
            job.record_error(error);
            return None;
        }

        let snapshot = self.conditions.synchronize(SyncValue::new(cfg.run, number, time));
        let global = |kind| {
            TransitionInfo::global(kind, Arc::clone(&lumi), context)
                .with_conditions(Some(Arc::clone(&snapshot)))
        };

        let begin = FinalWaitingTask::new();
        self.scheduler.begin_global(global(Transition::GlobalBeginLumi), begin.holder());

        let work = Arc::new(LumiWork {
            lumi: Arc::clone(&lumi),
            snapshot: Arc::clone(&snapshot),
            dealer: EventDealer::new(
                self.source.event_assignment,
                cfg.events_per_lumi,
                self.layout().streams,
            ),
            dealt: AtomicU64::new(0),
            first_event: u64::from(number - 1) * cfg.events_per_lumi + 1,
        });
        let mut tasks = JoinSet::new();
        let mut streams = HashMap::new();
        for (index, slot) in cursor.take_slots().into_iter().enumerate() {
            let stream = StreamId(index as u32);
            let handle = tasks.spawn(stream_lumi(Arc::clone(job), Arc::clone(&work), stream, slot));
            streams.insert(handle.id(), stream);
        }

        // Gated on every stream exiting the lumi.
        let end = FinalWaitingTask::new();
        self.scheduler.end_global_then_write(
            global(Transition::GlobalEndLumi),
            global(Transition::WriteLumi),
            end.holder(),
        );

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((stream, slot)) => cursor.put_slot(stream, slot),
                Err(error) => {
                    let stream = streams.get(&error.id()).copied();
                    job.record_error(SchedError::Scheduling(format!(
                        "stream task for {key} ended abnormally: {error}"
                    )));
                    if let Some(stream) = stream {
                        job.stream_exit(&key, stream);
                    }
                }
            }
        }
        job.note_undealt(
            &key,
            cfg.events_per_lumi.saturating_sub(work.dealt.load(Ordering::Acquire)),
        );
        job.note(&begin.wait().await);
        Some(end)
    }
}

/// Position in the job: run/lumi ordinals (for context slots), the source
/// clock and the per-stream event principal slots.
struct Cursor {
    first_timestamp: u64,
    runs: usize,
    lumis: usize,
    slots: Vec<Option<PrincipalSlot>>,
}

impl Cursor {
    fn new(first_timestamp: u64, streams: usize) -> Self {
        Self {
            first_timestamp,
            runs: 0,
            lumis: 0,
            slots: (0..streams).map(|_| Some(PrincipalSlot::new(ScopeKind::Event))).collect(),
        }
    }

    /// Every lumi advances the clock by one tick; a run starts at the tick of
    /// its first lumi.
    fn tick(&self) -> Timestamp {
        Timestamp(self.first_timestamp + self.lumis as u64)
    }

    fn next_run(&mut self) -> (usize, Timestamp) {
        self.runs += 1;
        (self.runs - 1, self.tick())
    }

    fn next_lumi(&mut self) -> (usize, Timestamp) {
        let time = self.tick();
        self.lumis += 1;
        (self.lumis - 1, time)
    }

    fn take_slots(&mut self) -> Vec<PrincipalSlot> {
        self.slots
            .iter_mut()
            .map(|s| s.take().unwrap_or_else(|| PrincipalSlot::new(ScopeKind::Event)))
            .collect()
    }

    fn put_slot(&mut self, stream: StreamId, slot: PrincipalSlot) {
        if let Some(entry) = self.slots.get_mut(stream.index()) {
            *entry = Some(slot);
        }
    }
}

/// Global ends still in flight, bounded by the number of concurrent units.
struct PendingEnds {
    limit: usize,
    queue: VecDeque<FinalWaitingTask>,
}

impl PendingEnds {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, end: FinalWaitingTask) {
        self.queue.push_back(end);
    }

    /// Wait until another unit may start.
    async fn make_room(&mut self, job: &JobState) {
        while self.queue.len() >= self.limit {
            let Some(end) = self.queue.pop_front() else {
                break;
            };
            job.note(&end.wait().await);
        }
    }

    async fn drain(&mut self, job: &JobState) {
        while let Some(end) = self.queue.pop_front() {
            job.note(&end.wait().await);
        }
    }
}
