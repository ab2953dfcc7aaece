#![allow(dead_code)]

use evsched::concurrency::ConcurrencyKind;
use evsched::conditions::Iov;
use evsched::config::{
    ConditionsConfig, FileConfig, JobConfig, ModuleConfig, PathConfig, ProcessSection,
    RawJobConfig, RecordConfig, RunConfig, SourceSection,
};
use evsched::transition::Transition;
use evsched::types::{EventAssignment, EventFailurePolicy, RefreshPolicy, TimeType};

/// Builder for `JobConfig` to simplify test setup.
pub struct JobConfigBuilder {
    config: RawJobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawJobConfig {
                process: ProcessSection::default(),
                source: SourceSection::default(),
                modules: Vec::new(),
                paths: Vec::new(),
                conditions: ConditionsConfig::default(),
            },
        }
    }

    pub fn streams(mut self, n: usize) -> Self {
        self.config.process.streams = n;
        self
    }

    pub fn threads(mut self, n: usize) -> Self {
        self.config.process.threads = Some(n);
        self
    }

    pub fn concurrent_lumis(mut self, n: usize) -> Self {
        self.config.process.concurrent_lumis = n;
        self
    }

    pub fn concurrent_runs(mut self, n: usize) -> Self {
        self.config.process.concurrent_runs = n;
        self
    }

    pub fn on_event_failure(mut self, policy: EventFailurePolicy) -> Self {
        self.config.process.on_event_failure = policy;
        self
    }

    pub fn event_assignment(mut self, assignment: EventAssignment) -> Self {
        self.config.source.event_assignment = assignment;
        self
    }

    /// Start a new input file; following `run` calls go into it.
    pub fn file(mut self, name: &str) -> Self {
        self.config.source.files.push(FileConfig {
            name: name.to_string(),
            runs: Vec::new(),
        });
        self
    }

    /// Add a run to the current file (opening `file0` if there is none).
    pub fn run(mut self, run: u32, lumis: u32, events_per_lumi: u64) -> Self {
        if self.config.source.files.is_empty() {
            self = self.file("file0");
        }
        if let Some(file) = self.config.source.files.last_mut() {
            file.runs.push(RunConfig {
                run,
                lumis,
                events_per_lumi,
            });
        }
        self
    }

    pub fn with_module(mut self, module: ModuleConfig) -> Self {
        self.config.modules.push(module);
        self
    }

    pub fn conditions_policy(mut self, policy: RefreshPolicy) -> Self {
        self.config.conditions.policy = policy;
        self
    }

    pub fn path(mut self, name: &str, modules: &[&str]) -> Self {
        self.config.paths.push(PathConfig {
            name: name.to_string(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    /// Declare a condition record with `(since, payload)` IOVs.
    pub fn record(mut self, name: &str, time_type: TimeType, iovs: &[(u64, &str)]) -> Self {
        let iovs = iovs
            .iter()
            .map(|(since, payload)| Iov {
                since: *since,
                payload: payload.to_string(),
            })
            .collect();
        self.config.conditions.records.insert(
            name.to_string(),
            RecordConfig {
                tag: None,
                time_type,
                refresh_time: None,
                iovs,
            },
        );
        self
    }

    /// The unvalidated description, for tests that expect validation errors.
    pub fn raw(self) -> RawJobConfig {
        self.config
    }

    pub fn build(self) -> JobConfig {
        JobConfig::try_from(self.config).expect("Failed to build valid job from builder")
    }
}

impl Default for JobConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ModuleConfig`.
pub struct ModuleConfigBuilder {
    module: ModuleConfig,
}

impl ModuleConfigBuilder {
    pub fn new(label: &str, kind: &str) -> Self {
        Self {
            module: ModuleConfig {
                label: label.to_string(),
                kind: kind.to_string(),
                ..ModuleConfig::default()
            },
        }
    }

    pub fn consumes(mut self, label: &str) -> Self {
        self.module.consumes.push(label.to_string());
        self
    }

    pub fn events(mut self, on: bool) -> Self {
        self.module.events = Some(on);
        self
    }

    pub fn global_runs(mut self, on: bool) -> Self {
        self.module.global_runs = Some(on);
        self
    }

    pub fn global_lumis(mut self, on: bool) -> Self {
        self.module.global_lumis = Some(on);
        self
    }

    pub fn stream_runs(mut self, on: bool) -> Self {
        self.module.stream_runs = Some(on);
        self
    }

    pub fn stream_lumis(mut self, on: bool) -> Self {
        self.module.stream_lumis = Some(on);
        self
    }

    pub fn process_blocks(mut self, on: bool) -> Self {
        self.module.process_blocks = Some(on);
        self
    }

    pub fn input_files(mut self, on: bool) -> Self {
        self.module.input_files = Some(on);
        self
    }

    pub fn streams(mut self, on: bool) -> Self {
        self.module.streams = Some(on);
        self
    }

    pub fn output(mut self, on: bool) -> Self {
        self.module.output = Some(on);
        self
    }

    pub fn acquire(mut self, on: bool) -> Self {
        self.module.acquire = Some(on);
        self
    }

    pub fn prescale(mut self, n: u64) -> Self {
        self.module.prescale = Some(n);
        self
    }

    pub fn concurrency(mut self, kind: ConcurrencyKind) -> Self {
        self.module.concurrency = kind;
        self
    }

    pub fn fail_on_event(mut self, event: u64) -> Self {
        self.module.fail_on_event = Some(event);
        self
    }

    pub fn fail_on_stream(mut self, stream: u32) -> Self {
        self.module.fail_on_stream = Some(stream);
        self
    }

    pub fn fail_on_transition(mut self, t: Transition) -> Self {
        self.module.fail_on_transition = Some(t);
        self
    }

    pub fn acquire_delay_ms(mut self, ms: u64) -> Self {
        self.module.acquire_delay_ms = Some(ms);
        self
    }

    pub fn value(mut self, value: i64) -> Self {
        self.module.value = Some(value);
        self
    }

    pub fn build(self) -> ModuleConfig {
        self.module
    }
}
