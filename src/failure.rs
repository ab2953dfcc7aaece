// src/failure.rs

//! Failure values carried through continuation chains.
//!
//! A module callback that fails (or panics) never unwinds across a scheduling
//! boundary. The worker captures it as a [`TransitionFailure`] and every
//! continuation downstream receives it as part of an [`Outcome`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::principal::Coordinates;
use crate::transition::{Transition, TransitionInfo};
use crate::types::StreamId;

/// Error returned by a module callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("{0}")]
    Failed(String),

    #[error("product '{0}' not found")]
    ProductNotFound(String),

    #[error("product '{0}' was already put")]
    ProductAlreadyPut(String),

    #[error("product '{0}' may not be put by this module")]
    ProductNotOwned(String),

    #[error("product '{0}' has an unexpected type")]
    ProductType(String),

    #[error("condition record '{0}' is not available for this transition")]
    MissingCondition(String),

    #[error("module panicked: {0}")]
    Panic(String),
}

impl ModuleError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ModuleError::Failed(msg.into())
    }
}

/// Classification used to pick the job's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A module callback (or its acquire step) failed.
    Module,
    /// A scheduling invariant was violated; the job must abort.
    Scheduling,
}

/// Structured record of a failed transition.
#[derive(Debug, Clone)]
pub struct TransitionFailure {
    pub kind: FailureKind,
    pub module: Option<String>,
    pub transition: Option<Transition>,
    pub stream: Option<StreamId>,
    pub coordinates: Option<Coordinates>,
    pub cause: String,
    pub elapsed: Duration,
}

impl TransitionFailure {
    pub fn module(
        module: &str,
        info: &TransitionInfo,
        error: &ModuleError,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind: FailureKind::Module,
            module: Some(module.to_string()),
            transition: Some(info.kind()),
            stream: info.stream(),
            coordinates: Some(*info.principal().coordinates()),
            cause: error.to_string(),
            elapsed,
        }
    }

    pub fn scheduling(cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Scheduling,
            module: None,
            transition: None,
            stream: None,
            coordinates: None,
            cause: cause.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn scheduling_for(info: &TransitionInfo, module: Option<&str>, cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Scheduling,
            module: module.map(str::to_string),
            transition: Some(info.kind()),
            stream: info.stream(),
            coordinates: Some(*info.principal().coordinates()),
            cause: cause.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Scheduling
    }

    /// Whether this failure was raised by the given module itself.
    pub fn raised_by(&self, module: &str) -> bool {
        self.kind == FailureKind::Module && self.module.as_deref() == Some(module)
    }

    pub fn into_ref(self) -> FailureRef {
        Arc::new(self)
    }
}

impl fmt::Display for TransitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "module '{module}'")?;
        } else {
            f.write_str("scheduler")?;
        }
        if let Some(t) = self.transition {
            write!(f, " during {t}")?;
        }
        if let Some(stream) = self.stream {
            write!(f, " on {stream}")?;
        }
        if let Some(coords) = &self.coordinates {
            write!(f, " at {coords}")?;
        }
        write!(f, ": {}", self.cause)
    }
}

pub type FailureRef = Arc<TransitionFailure>;

/// Result of a unit of scheduled work. Failures are plain data.
pub type Outcome = std::result::Result<(), FailureRef>;

