// tests/paths.rs

mod common;
use crate::common::{JobConfigBuilder, ModuleConfigBuilder, Recorder, recording, run_job};

use evsched::schedule::PathSummary;
use evsched::transition::Transition;
use evsched::types::{EventFailurePolicy, StreamId};

fn prescale(label: &str, n: u64) -> evsched::config::ModuleConfig {
    ModuleConfigBuilder::new(label, "filter").prescale(n).build()
}

fn summary(name: &str, visited: u64, accepted: u64) -> PathSummary {
    PathSummary {
        name: name.to_string(),
        visited,
        accepted,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_events_skip_the_rest_of_the_path() {
    let cfg = JobConfigBuilder::new()
        .streams(1)
        .run(1, 1, 6)
        .with_module(prescale("sel", 2))
        .with_module(recording("after").build())
        .with_module(recording("anywhere").build())
        .path("even", &["sel", "after"])
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;
    assert!(done.report.is_success(), "failures: {:?}", done.report.failures);

    assert_eq!(recorder.events_on("after", StreamId(0)), [2, 4, 6]);
    // Modules on no path see every event.
    assert_eq!(recorder.events_on("anywhere", StreamId(0)), [1, 2, 3, 4, 5, 6]);
    // A rejected event still counts as processed.
    assert_eq!(done.report.total_events(), 6);
    assert_eq!(done.report.paths, [summary("even", 6, 3)]);

    // Paths only shape events; scoped transitions still reach every module.
    assert_eq!(recorder.count("after", Transition::GlobalBeginLumi), 1);
    let sel = done.processor.scheduler().worker("sel").unwrap();
    assert_eq!(sel.call_count(Transition::Event), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn module_on_two_paths_runs_once_per_event() {
    let cfg = JobConfigBuilder::new()
        .streams(2)
        .run(1, 2, 3)
        .with_module(prescale("sel", 3))
        .with_module(recording("shared").build())
        .path("third", &["sel", "shared"])
        .path("all", &["shared"])
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;
    assert!(done.report.is_success(), "failures: {:?}", done.report.failures);

    assert_eq!(recorder.count("shared", Transition::Event), 6);
    let shared = done.processor.scheduler().worker("shared").unwrap();
    assert_eq!(shared.call_count(Transition::Event), 6);
    assert_eq!(done.report.paths, [summary("third", 6, 2), summary("all", 6, 6)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_entry_ends_its_path_and_reports_once() {
    let cfg = JobConfigBuilder::new()
        .streams(1)
        .on_event_failure(EventFailurePolicy::Continue)
        .run(1, 1, 4)
        .with_module(recording("bad").fail_on_event(2).build())
        .with_module(recording("after").build())
        .path("p", &["bad", "after"])
        .build();
    let recorder = Recorder::new();
    let done = run_job(&cfg, &recorder).await;

    assert_eq!(recorder.events_on("after", StreamId(0)), [1, 3, 4]);
    assert_eq!(done.report.failures.len(), 1);
    assert!(done.report.failures[0].raised_by("bad"));
    assert_eq!(done.report.paths, [summary("p", 4, 3)]);
    assert_eq!(done.report.events_per_stream, [3]);
}

#[test]
fn path_naming_an_unknown_module_is_rejected() {
    use evsched::config::JobConfig;

    let raw = JobConfigBuilder::new()
        .run(1, 1, 1)
        .with_module(prescale("sel", 2))
        .path("p", &["sel", "ghost"])
        .raw();
    let err = JobConfig::try_from(raw).unwrap_err();
    assert!(err.is_configuration());
}
