// src/conditions/mod.rs

//! Time-varying condition data.
//!
//! The scheduler only needs to know which interval of validity (and which
//! payload) a condition record has at a given run/lumi/time. [`source`]
//! answers that over IOV tags with a configurable refresh policy, and
//! [`cache`] freezes the answers into a [`ConditionSnapshot`] that every
//! transition of one run or lumi sees.

pub mod cache;
pub mod iov;
pub mod source;

use std::sync::Arc;

pub use cache::{ConditionCache, ConditionEntry, ConditionSnapshot};
pub use iov::{CondTime, Iov, IovTag, ValidityInterval};
pub use source::{
    ConditionSource, ConditionStats, InMemoryTagStore, IovConditionSource, RecordSpec, TagStore,
};

use crate::config::ConditionsConfig;

/// Build the in-memory condition source described by `[conditions]`.
pub fn source_from_config(cfg: &ConditionsConfig) -> IovConditionSource {
    let tags = cfg.records.iter().map(|(name, rec)| {
        let tag = IovTag {
            name: rec.tag.clone().unwrap_or_else(|| name.clone()),
            time_type: rec.time_type,
            iovs: rec.iovs.clone(),
        };
        (name.clone(), tag)
    });
    let store = Arc::new(InMemoryTagStore::new(tags));
    let specs = cfg.records.iter().map(|(name, rec)| {
        let spec = RecordSpec {
            time_type: rec.time_type,
            refresh_time: rec.refresh_time,
        };
        (name.clone(), spec)
    });
    IovConditionSource::new(cfg.policy, store, specs)
}
