// tests/transitions.rs

mod common;
use crate::common::{JobConfigBuilder, Recorder, recording, run_job};

use evsched::transition::Transition;
use evsched::types::{EventAssignment, StreamId};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_job_calls_every_transition_the_expected_number_of_times() {
    let cfg = JobConfigBuilder::new()
        .streams(2)
        .event_assignment(EventAssignment::RoundRobin)
        .run(1, 2, 3)
        .with_module(recording("rec").build())
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;

    assert!(done.report.is_success(), "failures: {:?}", done.report.failures);
    assert_eq!(done.report.exit_code(), 0);

    let expected = [
        (Transition::BeginJob, 1),
        (Transition::EndJob, 1),
        (Transition::BeginStream, 2),
        (Transition::EndStream, 2),
        (Transition::BeginProcessBlock, 1),
        (Transition::EndProcessBlock, 1),
        (Transition::OpenInputFile, 1),
        (Transition::CloseInputFile, 1),
        (Transition::GlobalBeginRun, 1),
        (Transition::StreamBeginRun, 2),
        (Transition::GlobalBeginLumi, 2),
        (Transition::StreamBeginLumi, 4),
        (Transition::Event, 6),
        (Transition::StreamEndLumi, 4),
        (Transition::GlobalEndLumi, 2),
        (Transition::WriteLumi, 2),
        (Transition::StreamEndRun, 2),
        (Transition::GlobalEndRun, 1),
        (Transition::WriteRun, 1),
    ];
    for (t, n) in expected {
        assert_eq!(recorder.count("rec", t), n, "{t}");
    }

    // Round robin inside each lumi: events 1..=3 then 4..=6.
    let mut on_0 = recorder.events_on("rec", StreamId(0));
    let mut on_1 = recorder.events_on("rec", StreamId(1));
    on_0.sort_unstable();
    on_1.sort_unstable();
    assert_eq!(on_0, [1, 3, 4, 6]);
    assert_eq!(on_1, [2, 5]);
    assert_eq!(done.report.events_per_stream, [4, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn job_transitions_bracket_everything_else() {
    let cfg = JobConfigBuilder::new()
        .streams(3)
        .file("a")
        .run(1, 1, 4)
        .file("b")
        .run(2, 2, 2)
        .with_module(recording("rec").build())
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;
    assert!(done.report.is_success());

    let names = recorder.names("rec");
    assert_eq!(names.first(), Some(&"beginJob"));
    assert_eq!(names.last(), Some(&"endJob"));

    let opens = recorder.positions("rec", Transition::OpenInputFile);
    let closes = recorder.positions("rec", Transition::CloseInputFile);
    let run_begins = recorder.positions("rec", Transition::GlobalBeginRun);
    let run_writes = recorder.positions("rec", Transition::WriteRun);
    assert_eq!(opens.len(), 2);
    assert_eq!(closes.len(), 2);
    // Each file wraps its own run.
    for i in 0..2 {
        assert!(opens[i] < run_begins[i]);
        assert!(run_writes[i] < closes[i]);
    }
    assert!(closes[0] < opens[1]);
    assert_eq!(done.report.total_events(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disabled_capabilities_are_never_invoked() {
    let cfg = JobConfigBuilder::new()
        .streams(2)
        .run(1, 2, 5)
        .with_module(recording("full").build())
        .with_module(
            recording("runs_only")
                .events(false)
                .stream_lumis(false)
                .stream_runs(false)
                .global_lumis(false)
                .output(false)
                .process_blocks(false)
                .input_files(false)
                .streams(false)
                .build(),
        )
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;
    assert!(done.report.is_success());

    assert_eq!(recorder.names("runs_only"), [
        "beginJob",
        "globalBeginRun",
        "globalEndRun",
        "endJob"
    ]);
    assert_eq!(recorder.count("full", Transition::Event), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn builtin_pipeline_reads_each_source_product_once_per_event() {
    use evsched::concurrency::ConcurrencyKind;
    use evsched_test_utils::ModuleConfigBuilder;

    let cfg = JobConfigBuilder::new()
        .streams(2)
        .concurrent_lumis(2)
        .run(1, 3, 4)
        .with_module(ModuleConfigBuilder::new("tracks", "producer").value(2).build())
        .with_module(
            ModuleConfigBuilder::new("histos", "analyzer")
                .consumes("tracks")
                .concurrency(ConcurrencyKind::Limited(1))
                .build(),
        )
        .with_module(ModuleConfigBuilder::new("fetch", "acquirer").acquire_delay_ms(1).build())
        .with_module(ModuleConfigBuilder::new("out", "output").build())
        .with_module(ModuleConfigBuilder::new("count", "counter").build())
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;

    assert!(done.report.is_success(), "failures: {:?}", done.report.failures);
    assert_eq!(done.report.total_events(), 12);
    assert_eq!(done.processor.source_reads(), 12);
    let histos = done.processor.scheduler().worker("histos").unwrap();
    assert_eq!(histos.call_count(Transition::Event), 12);
    let out = done.processor.scheduler().worker("out").unwrap();
    assert_eq!(out.call_count(Transition::WriteLumi), 3);
    assert_eq!(out.call_count(Transition::WriteRun), 1);
}

fn events_only(label: &str) -> evsched_test_utils::ModuleConfigBuilder {
    recording(label)
        .global_runs(false)
        .global_lumis(false)
        .stream_runs(false)
        .stream_lumis(false)
        .output(false)
        .process_blocks(false)
        .input_files(false)
        .streams(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn event_only_worker_sees_events_and_nothing_scoped() {
    let cfg = JobConfigBuilder::new()
        .streams(2)
        .event_assignment(EventAssignment::RoundRobin)
        .run(1, 1, 6)
        .with_module(recording("w1").build())
        .with_module(events_only("w2").build())
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;
    assert!(done.report.is_success(), "failures: {:?}", done.report.failures);
    assert_eq!(done.report.events_per_stream, [3, 3]);

    let scheduler = done.processor.scheduler();
    let (w1, w2) = (scheduler.worker("w1").unwrap(), scheduler.worker("w2").unwrap());
    for (t, first, second) in [
        (Transition::GlobalBeginRun, 1, 0),
        (Transition::GlobalEndRun, 1, 0),
        (Transition::GlobalBeginLumi, 1, 0),
        (Transition::GlobalEndLumi, 1, 0),
        (Transition::Event, 6, 6),
    ] {
        assert_eq!(w1.call_count(t), first, "w1 {t}");
        assert_eq!(w2.call_count(t), second, "w2 {t}");
    }
    assert_eq!(recorder.count_on("w2", Transition::Event, StreamId(0)), 3);
    assert_eq!(recorder.count_on("w2", Transition::Event, StreamId(1)), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_coordinates_in_a_later_file_are_processed_again() {
    let cfg = JobConfigBuilder::new()
        .streams(1)
        .file("a")
        .run(1, 1, 1)
        .file("b")
        .run(1, 1, 1)
        .with_module(recording("all").build())
        .with_module(events_only("events").build())
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;
    assert!(done.report.is_success(), "failures: {:?}", done.report.failures);

    assert_eq!(done.report.total_events(), 2);
    assert_eq!(recorder.count("all", Transition::GlobalBeginRun), 2);
    assert_eq!(recorder.count("all", Transition::GlobalBeginLumi), 2);
    assert_eq!(recorder.count("all", Transition::WriteRun), 2);
    assert_eq!(recorder.events_on("all", StreamId(0)), [1, 1]);
    assert_eq!(recorder.events_on("events", StreamId(0)), [1, 1]);
}
