// tests/property.rs

mod common;
use crate::common::{JobConfigBuilder, Recorder, recording, run_job};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use proptest::prelude::*;

use evsched::concurrency::{FinalWaitingTask, TaskPool, WaitingTask};
use evsched::failure::{Outcome, TransitionFailure};
use evsched::module::{Capabilities, Module};
use evsched::principal::{Coordinates, ProductRegistry, ScopeKind};
use evsched::report::CollectingReporter;
use evsched::transition::{ContextId, ContextLayout, Transition, TransitionInfo};
use evsched::types::{EventAssignment, Timestamp};
use evsched::worker::{Worker, WorkerEnv};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever order holders finish in, the continuation runs once and
    /// sees the first failure that was signalled.
    #[test]
    fn waiting_task_fires_once_with_first_failure(
        fails in prop::collection::vec(any::<bool>(), 1..24),
        order_seed in any::<u64>(),
    ) {
        let fired = Arc::new(AtomicU32::new(0));
        let seen: Arc<Mutex<Option<Outcome>>> = Arc::default();
        let task = {
            let fired = Arc::clone(&fired);
            let seen = Arc::clone(&seen);
            WaitingTask::new("prop", move |outcome| {
                fired.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some(outcome);
            })
        };

        let mut holders: Vec<_> = fails.iter().enumerate().map(|(i, f)| (i, *f, task.holder())).collect();
        // Deterministic shuffle driven by the seed.
        let n = holders.len();
        for i in (1..n).rev() {
            let j = (order_seed.rotate_left(i as u32) as usize) % (i + 1);
            holders.swap(i, j);
        }

        let mut first_failure = None;
        for (i, fail, holder) in holders {
            prop_assert_eq!(fired.load(Ordering::SeqCst), 0);
            if fail {
                first_failure.get_or_insert(i);
                holder.done_waiting(Err(TransitionFailure::scheduling(i.to_string()).into_ref()));
            } else {
                holder.done_waiting(Ok(()));
            }
        }

        prop_assert_eq!(fired.load(Ordering::SeqCst), 1);
        let cause = seen
            .lock()
            .as_ref()
            .and_then(|o| o.as_ref().err())
            .map(|f| f.cause.clone());
        prop_assert_eq!(cause, first_failure.map(|i| i.to_string()));
    }

    /// Any number of concurrent requests for one transition run the module
    /// once and release every requester.
    #[test]
    fn worker_runs_each_transition_once(requests in 1usize..16) {
        let rt = runtime();
        let calls = rt.block_on(async move {
            let layout = ContextLayout::new(1, 1, 1);
            let module = Module::builder("w", "test")
                .capabilities(Capabilities::all())
                .on_wanted(|_| Ok(()))
                .build()
                .unwrap();
            let worker = Arc::new(Worker::new(0, module, &layout, vec![]));
            let env = Arc::new(WorkerEnv {
                workers: vec![Arc::clone(&worker)],
                reporter: Arc::new(CollectingReporter::new()),
                pool: TaskPool::current().unwrap(),
            });
            let principal = ProductRegistry::new()
                .make_principal(ScopeKind::Run, Coordinates::run(1, Timestamp(1)), None)
                .unwrap();
            let info = TransitionInfo::global(Transition::GlobalBeginRun, principal, ContextId::GlobalRun(0));

            let fin = FinalWaitingTask::new();
            for _ in 0..requests {
                worker.run_transition(&env, info.clone(), fin.holder());
            }
            assert!(fin.wait().await.is_ok());
            worker.call_count(Transition::GlobalBeginRun)
        });
        prop_assert_eq!(calls, 1);
    }

    /// Every configured event is processed exactly once, whatever the
    /// stream count and assignment.
    #[test]
    fn every_event_is_processed_once(
        streams in 1usize..4,
        round_robin in any::<bool>(),
        runs in prop::collection::vec((1u32..3, 0u64..5), 1..4),
    ) {
        let assignment = if round_robin { EventAssignment::RoundRobin } else { EventAssignment::Shared };
        let mut builder = JobConfigBuilder::new()
            .streams(streams)
            .event_assignment(assignment)
            .with_module(recording("rec").build());
        for (i, (lumis, events)) in runs.iter().enumerate() {
            builder = builder.run(i as u32 + 1, *lumis, *events);
        }
        let cfg = builder.build();
        let expected = cfg.total_events();

        let recorder = Recorder::new();
        let report = runtime().block_on(run_job(&cfg, &recorder)).report;

        prop_assert!(report.is_success());
        prop_assert_eq!(report.total_events(), expected);

        let events: Vec<_> = recorder
            .calls()
            .into_iter()
            .filter(|c| c.transition == Transition::Event)
            .map(|c| (c.coordinates.run, c.coordinates.lumi, c.coordinates.event))
            .collect();
        prop_assert_eq!(events.len() as u64, expected);
        let unique: HashSet<_> = events.iter().collect();
        prop_assert_eq!(unique.len(), events.len());
    }
}
