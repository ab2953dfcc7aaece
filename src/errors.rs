// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! These are the errors that abort a job *before* or *outside* transition
//! processing. Failures raised by module callbacks never use this type; they
//! travel as [`crate::failure::Outcome`] values through waiting tasks.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown module kind '{kind}' for module '{label}'")]
    UnknownModuleKind { label: String, kind: String },

    #[error("Cycle detected in module graph: {0}")]
    ModuleCycle(String),

    #[error("Scheduling invariant violated: {0}")]
    Scheduling(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedError {
    /// Whether this error was detected while validating the job description.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SchedError::ConfigError(_)
                | SchedError::UnknownModuleKind { .. }
                | SchedError::ModuleCycle(_)
                | SchedError::TomlError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedError>;
