// src/transition/context.rs

//! Execution contexts: which stream or global slot a transition runs in.

use std::fmt;

use crate::transition::Transition;
use crate::types::StreamId;

/// Where a transition executes.
///
/// Workers keep one state record per context. Global run and lumi slots
/// allow a fixed number of runs/lumis to be in flight at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextId {
    /// Job-wide transitions (begin/end job, process block, file notifications).
    Job,
    Stream(StreamId),
    GlobalRun(usize),
    GlobalLumi(usize),
}

impl ContextId {
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            ContextId::Stream(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Job => f.write_str("job"),
            ContextId::Stream(id) => write!(f, "{id}"),
            ContextId::GlobalRun(slot) => write!(f, "global run slot {slot}"),
            ContextId::GlobalLumi(slot) => write!(f, "global lumi slot {slot}"),
        }
    }
}

/// Number of concurrent execution slots of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLayout {
    pub streams: usize,
    pub run_slots: usize,
    pub lumi_slots: usize,
}

impl ContextLayout {
    pub fn new(streams: usize, run_slots: usize, lumi_slots: usize) -> Self {
        Self {
            streams: streams.max(1),
            run_slots: run_slots.max(1),
            lumi_slots: lumi_slots.max(1),
        }
    }

    /// Every context a worker has to preallocate state for.
    pub fn contexts(&self) -> impl Iterator<Item = ContextId> + '_ {
        std::iter::once(ContextId::Job)
            .chain((0..self.streams).map(|s| ContextId::Stream(StreamId(s as u32))))
            .chain((0..self.run_slots).map(ContextId::GlobalRun))
            .chain((0..self.lumi_slots).map(ContextId::GlobalLumi))
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        (0..self.streams).map(|s| StreamId(s as u32))
    }

    pub fn run_context(&self, ordinal: usize) -> ContextId {
        ContextId::GlobalRun(ordinal % self.run_slots)
    }

    pub fn lumi_context(&self, ordinal: usize) -> ContextId {
        ContextId::GlobalLumi(ordinal % self.lumi_slots)
    }
}

/// Diagnostic pairing of a context with the transition running in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentContext {
    pub context: ContextId,
    pub transition: Transition,
}

impl fmt::Display for ParentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.transition, self.context)
    }
}
