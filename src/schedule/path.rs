// src/schedule/path.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::PathConfig;
use crate::errors::{Result, SchedError};

/// An ordered list of workers run one after another for every event.
///
/// Entries are indices into the scheduler's worker list; a worker named on
/// several paths still runs at most once per event.
#[derive(Debug)]
pub struct Path {
    name: String,
    entries: Vec<usize>,
    visited: AtomicU64,
    accepted: AtomicU64,
}

/// Per-path event counts at the end of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSummary {
    pub name: String,
    /// Events the path started on.
    pub visited: u64,
    /// Events that made it through every entry.
    pub accepted: u64,
}

impl Path {
    /// Resolve `cfg` against the worker positions.
    pub fn new(cfg: &PathConfig, position: &HashMap<&str, usize>) -> Result<Self> {
        let entries = cfg
            .modules
            .iter()
            .map(|label| {
                position.get(label.as_str()).copied().ok_or_else(|| {
                    SchedError::ConfigError(format!(
                        "path '{}' names unknown module '{label}'",
                        cfg.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: cfg.name.clone(),
            entries,
            visited: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[usize] {
        &self.entries
    }

    pub fn contains(&self, worker: usize) -> bool {
        self.entries.contains(&worker)
    }

    pub(crate) fn visit(&self) {
        self.visited.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn accept(&self) {
        self.accepted.fetch_add(1, Ordering::AcqRel);
    }

    pub fn summary(&self) -> PathSummary {
        PathSummary {
            name: self.name.clone(),
            visited: self.visited.load(Ordering::Acquire),
            accepted: self.accepted.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_follow_the_configured_order() {
        let position = HashMap::from([("a", 0), ("b", 1), ("c", 2)]);
        let cfg = PathConfig {
            name: "p".into(),
            modules: vec!["c".into(), "a".into()],
        };
        let path = Path::new(&cfg, &position).unwrap();
        assert_eq!(path.entries(), &[2, 0]);
        assert!(path.contains(0));
        assert!(!path.contains(1));

        path.visit();
        path.visit();
        path.accept();
        assert_eq!(path.summary(), PathSummary {
            name: "p".into(),
            visited: 2,
            accepted: 1,
        });
    }

    #[test]
    fn unknown_label_is_a_configuration_error() {
        let cfg = PathConfig {
            name: "p".into(),
            modules: vec!["nope".into()],
        };
        let err = Path::new(&cfg, &HashMap::new()).unwrap_err();
        assert!(err.is_configuration());
    }
}
