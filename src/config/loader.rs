// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{JobConfig, RawJobConfig};
use crate::errors::Result;

/// Read a job file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawJobConfig> {
    let config: RawJobConfig = toml::from_str(contents)?;
    Ok(config)
}

/// Read and validate a job file. This is the entry point the binary uses.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobConfig> {
    let raw = load_from_path(&path)?;
    JobConfig::try_from(raw)
}
