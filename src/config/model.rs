// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::concurrency::ConcurrencyKind;
use crate::conditions::Iov;
use crate::transition::Transition;
use crate::types::{EventAssignment, EventFailurePolicy, RefreshPolicy, RunNumber, TimeType};

/// Job description as read from a TOML file, before validation.
///
/// ```toml
/// [process]
/// name = "reco"
/// streams = 4
///
/// [source]
/// event_assignment = "round_robin"
///
/// [[source.files]]
/// name = "file1"
/// runs = [{ run = 1, lumis = 2, events_per_lumi = 10 }]
///
/// [[module]]
/// label = "tracks"
/// kind = "producer"
///
/// [[module]]
/// label = "summary"
/// kind = "analyzer"
/// consumes = ["tracks"]
///
/// [[path]]
/// name = "selected"
/// modules = ["tracks", "summary"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobConfig {
    #[serde(default)]
    pub process: ProcessSection,

    #[serde(default)]
    pub source: SourceSection,

    /// Modules in declaration order.
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,

    /// Event paths. Without any, every event module runs for every event.
    #[serde(default, rename = "path")]
    pub paths: Vec<PathConfig>,

    #[serde(default)]
    pub conditions: ConditionsConfig,
}

/// Validated job description. Only obtainable through `TryFrom<RawJobConfig>`.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub process: ProcessSection,
    pub source: SourceSection,
    pub modules: Vec<ModuleConfig>,
    pub paths: Vec<PathConfig>,
    pub conditions: ConditionsConfig,
}

impl JobConfig {
    pub(crate) fn new_unchecked(raw: RawJobConfig) -> Self {
        Self {
            process: raw.process,
            source: raw.source,
            modules: raw.modules,
            paths: raw.paths,
            conditions: raw.conditions,
        }
    }

    pub fn module(&self, label: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.label == label)
    }

    /// Threads for the pool; defaults to one per stream.
    pub fn threads(&self) -> usize {
        self.process.threads.unwrap_or(self.process.streams)
    }

    pub fn total_events(&self) -> u64 {
        self.source
            .files
            .iter()
            .flat_map(|f| f.runs.iter())
            .map(|r| u64::from(r.lumis) * r.events_per_lumi)
            .sum()
    }
}

/// `[process]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    #[serde(default = "default_process_name")]
    pub name: String,

    /// Number of concurrent event streams.
    #[serde(default = "default_one")]
    pub streams: usize,

    /// Size of the thread pool. `None` means one thread per stream.
    #[serde(default)]
    pub threads: Option<usize>,

    /// Luminosity blocks that may be open at the same time.
    #[serde(default = "default_one")]
    pub concurrent_lumis: usize,

    /// Runs that may be open at the same time.
    #[serde(default = "default_one")]
    pub concurrent_runs: usize,

    #[serde(default)]
    pub on_event_failure: EventFailurePolicy,
}

fn default_process_name() -> String {
    "evsched".to_string()
}

fn default_one() -> usize {
    1
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            name: default_process_name(),
            streams: 1,
            threads: None,
            concurrent_lumis: 1,
            concurrent_runs: 1,
            on_event_failure: EventFailurePolicy::default(),
        }
    }
}

/// `[source]` section: the synthetic input the driver walks through.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    #[serde(default)]
    pub event_assignment: EventAssignment,

    /// Timestamp of the first lumi; later lumis and events count up from it.
    #[serde(default = "default_first_timestamp")]
    pub first_timestamp: u64,

    #[serde(default)]
    pub files: Vec<FileConfig>,
}

fn default_first_timestamp() -> u64 {
    1
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            event_assignment: EventAssignment::default(),
            first_timestamp: default_first_timestamp(),
            files: Vec::new(),
        }
    }
}

/// `[[source.files]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub name: String,

    #[serde(default)]
    pub runs: Vec<RunConfig>,
}

/// `[[source.files.runs]]` entry.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RunConfig {
    pub run: RunNumber,
    pub lumis: u32,
    pub events_per_lumi: u64,
}

/// `[[module]]` entry.
///
/// Capability fields left unset fall back to the defaults of the module's
/// kind.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModuleConfig {
    pub label: String,
    pub kind: String,

    /// Labels of modules whose products this module reads.
    #[serde(default)]
    pub consumes: Vec<String>,

    #[serde(default)]
    pub events: Option<bool>,
    #[serde(default)]
    pub global_runs: Option<bool>,
    #[serde(default)]
    pub global_lumis: Option<bool>,
    #[serde(default)]
    pub stream_runs: Option<bool>,
    #[serde(default)]
    pub stream_lumis: Option<bool>,
    #[serde(default)]
    pub process_blocks: Option<bool>,
    #[serde(default)]
    pub input_files: Option<bool>,
    #[serde(default)]
    pub streams: Option<bool>,
    #[serde(default)]
    pub acquire: Option<bool>,
    #[serde(default)]
    pub output: Option<bool>,

    #[serde(default)]
    pub concurrency: ConcurrencyKind,

    /// `failing` kind: fail on this event number.
    #[serde(default)]
    pub fail_on_event: Option<u64>,
    /// `failing` kind: only fail on this stream index.
    #[serde(default)]
    pub fail_on_stream: Option<u32>,
    /// `failing` kind: fail on every call of this transition.
    #[serde(default)]
    pub fail_on_transition: Option<Transition>,
    /// `acquirer` kind: simulated latency of the asynchronous step.
    #[serde(default)]
    pub acquire_delay_ms: Option<u64>,
    /// `producer` kind: value put into every event.
    #[serde(default)]
    pub value: Option<i64>,
    /// `filter` kind: accept only events whose number is a multiple of this.
    #[serde(default)]
    pub prescale: Option<u64>,
}

/// `[[path]]` entry: module labels run in order for every event. A filter
/// that rejects the event ends the path early.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PathConfig {
    pub name: String,
    pub modules: Vec<String>,
}

/// `[conditions]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConditionsConfig {
    #[serde(default)]
    pub policy: RefreshPolicy,

    #[serde(default)]
    pub records: BTreeMap<String, RecordConfig>,
}

/// `[conditions.records.<name>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordConfig {
    /// Tag name; defaults to the record name.
    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub time_type: TimeType,

    #[serde(default)]
    pub refresh_time: Option<u64>,

    pub iovs: Vec<Iov>,
}
