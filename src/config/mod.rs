// src/config/mod.rs

//! Job configuration.
//!
//! - `model.rs`: TOML-backed data model.
//! - `loader.rs`: read a job file from disk.
//! - `validate.rs`: turn a `RawJobConfig` into a checked `JobConfig`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConditionsConfig, FileConfig, JobConfig, ModuleConfig, PathConfig, ProcessSection,
    RawJobConfig, RecordConfig, RunConfig, SourceSection,
};
pub use validate::module_order;
