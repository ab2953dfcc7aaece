// src/schedule/mod.rs

//! Transition scheduling across workers and streams.

pub mod graph;
pub mod path;
pub mod scheduler;
pub mod scope;
pub mod shutdown;

pub use graph::ModuleGraph;
pub use path::{Path, PathSummary};
pub use scheduler::Scheduler;
pub use scope::ScopeStatus;
pub use shutdown::{ShutdownFlag, ShutdownReason};
