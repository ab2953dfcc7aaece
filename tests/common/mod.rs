#![allow(dead_code)]

use std::sync::Arc;

use evsched::concurrency::TaskPool;
use evsched::config::JobConfig;
use evsched::driver::EventProcessor;
use evsched::report::{CollectingReporter, JobReport};

pub use evsched_test_utils::{
    Call, JobConfigBuilder, ModuleConfigBuilder, Recorder, init_tracing, with_timeout,
};

/// Everything a finished test job leaves behind.
pub struct Finished {
    pub report: JobReport,
    pub reporter: Arc<CollectingReporter>,
    pub processor: EventProcessor,
}

/// Run `cfg` with the builtins plus the `recording` kind bound to `recorder`.
pub async fn run_job(cfg: &JobConfig, recorder: &Recorder) -> Finished {
    init_tracing();
    let reporter = Arc::new(CollectingReporter::new());
    let processor = EventProcessor::from_config(
        cfg,
        &recorder.registry(),
        reporter.clone(),
        TaskPool::current().expect("inside a tokio runtime"),
    )
    .expect("processor builds");
    let report = with_timeout(processor.run()).await;
    Finished {
        report,
        reporter,
        processor,
    }
}

pub fn recording(label: &str) -> ModuleConfigBuilder {
    ModuleConfigBuilder::new(label, "recording")
}
