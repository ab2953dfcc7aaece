// src/transition/mod.rs

//! Transition kinds, execution contexts and the immutable transition
//! descriptor handed to workers.
//!
//! - [`Transition`] enumerates every lifecycle point a worker may be invoked
//!   for, together with its scope and whether it is global or per-stream.
//! - [`context`] identifies *where* a transition executes (job, a stream, or a
//!   global run/lumi slot).
//! - [`info`] holds [`TransitionInfo`], the descriptor itself.

pub mod context;
pub mod info;

use std::fmt;

use serde::Deserialize;

pub use context::{ContextId, ContextLayout, ParentContext};
pub use info::TransitionInfo;

use crate::principal::ScopeKind;

/// A named lifecycle point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    BeginJob,
    EndJob,
    BeginStream,
    EndStream,
    BeginProcessBlock,
    EndProcessBlock,
    OpenInputFile,
    CloseInputFile,
    GlobalBeginRun,
    StreamBeginRun,
    GlobalBeginLumi,
    StreamBeginLumi,
    Event,
    StreamEndLumi,
    GlobalEndLumi,
    WriteLumi,
    StreamEndRun,
    GlobalEndRun,
    WriteRun,
}

impl Transition {
    pub const COUNT: usize = 19;

    pub const ALL: [Transition; Transition::COUNT] = [
        Transition::BeginJob,
        Transition::EndJob,
        Transition::BeginStream,
        Transition::EndStream,
        Transition::BeginProcessBlock,
        Transition::EndProcessBlock,
        Transition::OpenInputFile,
        Transition::CloseInputFile,
        Transition::GlobalBeginRun,
        Transition::StreamBeginRun,
        Transition::GlobalBeginLumi,
        Transition::StreamBeginLumi,
        Transition::Event,
        Transition::StreamEndLumi,
        Transition::GlobalEndLumi,
        Transition::WriteLumi,
        Transition::StreamEndRun,
        Transition::GlobalEndRun,
        Transition::WriteRun,
    ];

    /// Dense index, usable for per-transition counters.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Per-stream transitions execute independently on every stream.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Transition::BeginStream
                | Transition::EndStream
                | Transition::StreamBeginRun
                | Transition::StreamEndRun
                | Transition::StreamBeginLumi
                | Transition::StreamEndLumi
                | Transition::Event
        )
    }

    pub fn is_global(self) -> bool {
        !self.is_stream()
    }

    /// Synchronous job-control transitions run workers one at a time in
    /// dependency order, and the first failure stops the sequence.
    pub fn is_job_control(self) -> bool {
        matches!(
            self,
            Transition::BeginJob
                | Transition::EndJob
                | Transition::BeginStream
                | Transition::EndStream
        )
    }

    /// Scope of the principal this transition is bound to.
    pub fn scope(self) -> ScopeKind {
        match self {
            Transition::BeginJob
            | Transition::EndJob
            | Transition::BeginStream
            | Transition::EndStream
            | Transition::BeginProcessBlock
            | Transition::EndProcessBlock
            | Transition::OpenInputFile
            | Transition::CloseInputFile => ScopeKind::Process,
            Transition::GlobalBeginRun
            | Transition::StreamBeginRun
            | Transition::StreamEndRun
            | Transition::GlobalEndRun
            | Transition::WriteRun => ScopeKind::Run,
            Transition::GlobalBeginLumi
            | Transition::StreamBeginLumi
            | Transition::StreamEndLumi
            | Transition::GlobalEndLumi
            | Transition::WriteLumi => ScopeKind::Lumi,
            Transition::Event => ScopeKind::Event,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Transition::BeginJob => "beginJob",
            Transition::EndJob => "endJob",
            Transition::BeginStream => "beginStream",
            Transition::EndStream => "endStream",
            Transition::BeginProcessBlock => "beginProcessBlock",
            Transition::EndProcessBlock => "endProcessBlock",
            Transition::OpenInputFile => "openInputFile",
            Transition::CloseInputFile => "closeInputFile",
            Transition::GlobalBeginRun => "globalBeginRun",
            Transition::StreamBeginRun => "streamBeginRun",
            Transition::GlobalBeginLumi => "globalBeginLumi",
            Transition::StreamBeginLumi => "streamBeginLumi",
            Transition::Event => "event",
            Transition::StreamEndLumi => "streamEndLumi",
            Transition::GlobalEndLumi => "globalEndLumi",
            Transition::WriteLumi => "writeLumi",
            Transition::StreamEndRun => "streamEndRun",
            Transition::GlobalEndRun => "globalEndRun",
            Transition::WriteRun => "writeRun",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
