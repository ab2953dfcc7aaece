use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

pub type RunNumber = u32;
pub type LumiNumber = u32;
pub type EventNumber = u64;

/// Identifier of one concurrent processing stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream {}", self.0)
    }
}

/// Opaque time value attached to runs, lumis and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

/// Full identity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    pub run: RunNumber,
    pub lumi: LumiNumber,
    pub event: EventNumber,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.run, self.lumi, self.event)
    }
}

/// A point in data-taking time, as used by condition lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncValue {
    pub run: RunNumber,
    pub lumi: LumiNumber,
    pub time: Timestamp,
}

impl SyncValue {
    pub fn new(run: RunNumber, lumi: LumiNumber, time: Timestamp) -> Self {
        Self { run, lumi, time }
    }
}

impl fmt::Display for SyncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} lumi {} time {}", self.run, self.lumi, self.time.0)
    }
}

/// What a stream does after one of its events failed.
///
/// - `StopStream`: the failing stream takes no more events; other streams
///   keep going (default).
/// - `Abort`: request a job-wide shutdown; open units are still closed.
/// - `Continue`: record the failure and keep processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFailurePolicy {
    StopStream,
    Abort,
    Continue,
}

impl Default for EventFailurePolicy {
    fn default() -> Self {
        EventFailurePolicy::StopStream
    }
}

impl FromStr for EventFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stop_stream" => Ok(EventFailurePolicy::StopStream),
            "abort" => Ok(EventFailurePolicy::Abort),
            "continue" => Ok(EventFailurePolicy::Continue),
            other => Err(format!(
                "invalid on_event_failure: {other} (expected \"stop_stream\", \"abort\" or \"continue\")"
            )),
        }
    }
}

/// How events of a luminosity block are handed to streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAssignment {
    /// Streams pull the next event from a shared counter.
    Shared,
    /// Event `k` (0-based within the block) goes to stream `k % streams`.
    RoundRobin,
}

impl Default for EventAssignment {
    fn default() -> Self {
        EventAssignment::Shared
    }
}

/// Refresh behaviour of the condition source between runs/lumis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    NoRefresh,
    RefreshAlways,
    RefreshOpenIovs,
    RefreshEachRun,
    ReconnectEachRun,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::NoRefresh
    }
}

/// Unit in which a condition record's validity intervals are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeType {
    Run,
    Lumi,
    Timestamp,
}

impl Default for TimeType {
    fn default() -> Self {
        TimeType::Run
    }
}
