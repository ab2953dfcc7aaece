// src/conditions/source.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::conditions::iov::{
    CondTime, IovTag, TIME_LIMIT, ValidityInterval, bucket_end, limited_end, time_of,
};
use crate::types::{LumiNumber, RefreshPolicy, RunNumber, SyncValue, TimeType};

/// Where condition tags are loaded from.
pub trait TagStore: Send + Sync {
    /// Current content of the tag backing `record`.
    fn fetch(&self, record: &str) -> Option<IovTag>;
}

/// Tags kept in memory. [`update`](Self::update) simulates new IOVs being
/// appended while a job runs.
#[derive(Debug, Default)]
pub struct InMemoryTagStore {
    tags: Mutex<HashMap<String, IovTag>>,
}

impl InMemoryTagStore {
    pub fn new(tags: impl IntoIterator<Item = (String, IovTag)>) -> Self {
        Self {
            tags: Mutex::new(tags.into_iter().collect()),
        }
    }

    pub fn update(&self, record: &str, tag: IovTag) {
        self.tags.lock().insert(record.to_string(), tag);
    }
}

impl TagStore for InMemoryTagStore {
    fn fetch(&self, record: &str) -> Option<IovTag> {
        self.tags.lock().get(record).cloned()
    }
}

/// Answers "which interval of validity holds for this record at this time".
pub trait ConditionSource: Send + Sync {
    fn records(&self) -> Vec<String>;

    fn time_type(&self, record: &str) -> Option<TimeType>;

    /// Validity interval for `record` around `sync`, or `None` if the record
    /// has no valid data there.
    fn set_interval_for(&self, record: &str, sync: &SyncValue) -> Option<ValidityInterval>;

    /// Payload identity for `record` at `sync` from the currently loaded tag.
    fn payload_for(&self, record: &str, sync: &SyncValue) -> Option<Arc<str>>;

    fn stats(&self) -> ConditionStats;
}

/// Counters kept by a condition source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionStats {
    pub n_set: u64,
    pub n_run: u64,
    pub n_lumi: u64,
    pub n_refresh: u64,
    pub n_reconnect: u64,
    pub n_session_open: u64,
}

/// Per-record settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordSpec {
    pub time_type: TimeType,
    /// Bucket size used to close open intervals so the record is re-queried.
    /// `Some(0)` closes them at the current time.
    pub refresh_time: Option<CondTime>,
}

#[derive(Debug)]
struct RecordState {
    spec: RecordSpec,
    tag: Option<IovTag>,
    reconnect_pending: bool,
}

#[derive(Debug, Default)]
struct SourceState {
    records: BTreeMap<String, RecordState>,
    last_run: Option<RunNumber>,
    last_lumi: Option<LumiNumber>,
    last_record_runs: HashMap<String, RunNumber>,
    /// Transaction id of the open session, for run-scoped and
    /// refresh-time records respectively.
    sessions: [Option<String>; 2],
    stats: ConditionStats,
}

/// Condition source over IOV tags with configurable refresh behaviour.
pub struct IovConditionSource {
    policy: RefreshPolicy,
    store: Arc<dyn TagStore>,
    state: Mutex<SourceState>,
}

impl IovConditionSource {
    pub fn new(
        policy: RefreshPolicy,
        store: Arc<dyn TagStore>,
        records: impl IntoIterator<Item = (String, RecordSpec)>,
    ) -> Self {
        let records = records
            .into_iter()
            .map(|(name, spec)| {
                let tag = store.fetch(&name);
                let state = RecordState {
                    spec,
                    tag,
                    reconnect_pending: false,
                };
                (name, state)
            })
            .collect();
        Self {
            policy,
            store,
            state: Mutex::new(SourceState {
                records,
                ..SourceState::default()
            }),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }
}

impl ConditionSource for IovConditionSource {
    fn records(&self) -> Vec<String> {
        self.state.lock().records.keys().cloned().collect()
    }

    fn time_type(&self, record: &str) -> Option<TimeType> {
        self.state.lock().records.get(record).map(|r| r.spec.time_type)
    }

    fn set_interval_for(&self, record: &str, sync: &SyncValue) -> Option<ValidityInterval> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.n_set += 1;
        if state.last_run != Some(sync.run) {
            state.last_run = Some(sync.run);
            state.stats.n_run += 1;
        }
        if state.last_lumi != Some(sync.lumi) {
            state.last_lumi = Some(sync.lumi);
            state.stats.n_lumi += 1;
        }

        let rec = state.records.get_mut(record)?;
        let refresh_size = rec.spec.refresh_time;
        let reconnect_this = rec.reconnect_pending;
        rec.reconnect_pending = false;
        let time_type = rec.spec.time_type;

        let mut do_refresh = match self.policy {
            RefreshPolicy::RefreshEachRun | RefreshPolicy::ReconnectEachRun => {
                match state.last_record_runs.get_mut(record) {
                    Some(last) if *last == sync.run => false,
                    Some(last) => {
                        *last = sync.run;
                        true
                    }
                    None => {
                        state.last_record_runs.insert(record.to_string(), sync.run);
                        true
                    }
                }
            }
            RefreshPolicy::RefreshAlways | RefreshPolicy::RefreshOpenIovs => true,
            RefreshPolicy::NoRefresh => false,
        };

        let abtime = time_of(time_type, sync);
        if abtime == 0 {
            trace!(record, "time zero is user time; no interval");
            return None;
        }

        if do_refresh || refresh_size.is_some() {
            if self.policy == RefreshPolicy::ReconnectEachRun || reconnect_this {
                let transaction = match (reconnect_this, refresh_size) {
                    (true, Some(size)) if size > 0 => format!("{}", abtime / size),
                    _ => abtime.to_string(),
                };
                let pool = usize::from(refresh_size.is_some());
                if state.sessions[pool].as_deref() != Some(transaction.as_str()) {
                    debug!(record, %transaction, "re-opening condition session");
                    state.sessions[pool] = Some(transaction);
                    state.stats.n_session_open += 1;
                }
                state.stats.n_reconnect += 1;
            } else {
                state.stats.n_refresh += 1;
            }
            if let Some(tag) = self.store.fetch(record) {
                rec.tag = Some(tag);
            }
        }

        let tag = rec.tag.as_ref()?;
        let (validity, _) = tag.interval_for(abtime)?;
        let first = validity.first;
        let mut last = validity.last;

        if let Some(size) = refresh_size {
            if last == TIME_LIMIT {
                rec.reconnect_pending = true;
                last = if size > 0 { bucket_end(abtime, size, time_type) } else { 0 };
            }
        }

        if self.policy == RefreshPolicy::RefreshOpenIovs {
            do_refresh = last == TIME_LIMIT;
        }

        if last == 0 {
            return None;
        }
        let last = if do_refresh {
            limited_end(time_type, sync).max(first)
        } else {
            last
        };
        let interval = ValidityInterval { first, last };
        debug!(record, %interval, time = abtime, "validity interval set");
        Some(interval)
    }

    fn payload_for(&self, record: &str, sync: &SyncValue) -> Option<Arc<str>> {
        let state = self.state.lock();
        let rec = state.records.get(record)?;
        let tag = rec.tag.as_ref()?;
        let (_, payload) = tag.interval_for(time_of(rec.spec.time_type, sync))?;
        Some(Arc::from(payload))
    }

    fn stats(&self) -> ConditionStats {
        self.state.lock().stats
    }
}
