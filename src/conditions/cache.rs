// src/conditions/cache.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::conditions::ConditionSource;
use crate::conditions::iov::{ValidityInterval, time_of};
use crate::types::SyncValue;

/// Interval and payload of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionEntry {
    pub interval: ValidityInterval,
    pub payload: Arc<str>,
}

/// Condition answers frozen for one global transition and everything nested
/// inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionSnapshot {
    pub sync: SyncValue,
    pub entries: BTreeMap<String, ConditionEntry>,
}

impl ConditionSnapshot {
    pub fn get(&self, record: &str) -> Option<&ConditionEntry> {
        self.entries.get(record)
    }

    pub fn payload(&self, record: &str) -> Option<&str> {
        self.get(record).map(|e| &*e.payload)
    }
}

/// Caches the interval of every record and only asks the source again once
/// the sync point leaves it.
pub struct ConditionCache {
    source: Arc<dyn ConditionSource>,
    entries: Mutex<BTreeMap<String, ConditionEntry>>,
}

impl ConditionCache {
    pub fn new(source: Arc<dyn ConditionSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn ConditionSource> {
        &self.source
    }

    pub fn synchronize(&self, sync: SyncValue) -> Arc<ConditionSnapshot> {
        let mut entries = self.entries.lock();
        for record in self.source.records() {
            let Some(time_type) = self.source.time_type(&record) else {
                continue;
            };
            let time = time_of(time_type, &sync);
            let still_valid = entries
                .get(&record)
                .is_some_and(|e| e.interval.contains(time));
            if still_valid {
                continue;
            }
            let fresh = self.source.set_interval_for(&record, &sync).and_then(|interval| {
                let payload = self.source.payload_for(&record, &sync)?;
                Some(ConditionEntry { interval, payload })
            });
            match fresh {
                Some(entry) => {
                    debug!(record = %record, interval = %entry.interval, payload = %entry.payload, "condition updated");
                    entries.insert(record, entry);
                }
                None => {
                    entries.remove(&record);
                }
            }
        }
        Arc::new(ConditionSnapshot {
            sync,
            entries: entries.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::iov::{Iov, IovTag};
    use crate::conditions::{InMemoryTagStore, IovConditionSource, RecordSpec};
    use crate::types::{RefreshPolicy, TimeType, Timestamp};

    fn cache() -> ConditionCache {
        let tag = IovTag {
            name: "Align_v3".into(),
            time_type: TimeType::Run,
            iovs: vec![
                Iov { since: 1, payload: "a".into() },
                Iov { since: 3, payload: "b".into() },
            ],
        };
        let store = Arc::new(InMemoryTagStore::new([("Alignment".to_string(), tag)]));
        let source = IovConditionSource::new(
            RefreshPolicy::NoRefresh,
            store,
            [("Alignment".to_string(), RecordSpec::default())],
        );
        ConditionCache::new(Arc::new(source))
    }

    #[test]
    fn reuses_intervals_that_still_hold() {
        let cache = cache();
        let s1 = cache.synchronize(SyncValue::new(1, 0, Timestamp(1)));
        let s2 = cache.synchronize(SyncValue::new(2, 0, Timestamp(2)));
        let s3 = cache.synchronize(SyncValue::new(3, 0, Timestamp(3)));
        assert_eq!(s1.payload("Alignment"), Some("a"));
        assert_eq!(s2.payload("Alignment"), Some("a"));
        assert_eq!(s3.payload("Alignment"), Some("b"));
        assert_eq!(cache.source().stats().n_set, 2);
    }
}
