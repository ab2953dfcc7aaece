// src/conditions/iov.rs

//! Intervals of validity and the time arithmetic behind them.

use std::fmt;

use serde::Deserialize;

use crate::types::{SyncValue, TimeType};

/// Condition time expressed in a record's [`TimeType`].
pub type CondTime = u64;

/// End value of an interval that is still open.
pub const TIME_LIMIT: CondTime = u64::MAX;

/// One entry of an IOV sequence: `payload` is valid from `since` until the
/// next entry starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Iov {
    pub since: CondTime,
    pub payload: String,
}

/// A named, ordered IOV sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IovTag {
    pub name: String,
    pub time_type: TimeType,
    pub iovs: Vec<Iov>,
}

impl IovTag {
    /// Interval and payload covering `time`, if any IOV starts at or before it.
    pub fn interval_for(&self, time: CondTime) -> Option<(ValidityInterval, &str)> {
        let pos = self.iovs.partition_point(|iov| iov.since <= time);
        let current = self.iovs.get(pos.checked_sub(1)?)?;
        let last = match self.iovs.get(pos) {
            Some(next) => next.since.saturating_sub(1),
            None => TIME_LIMIT,
        };
        Some((
            ValidityInterval {
                first: current.since,
                last,
            },
            current.payload.as_str(),
        ))
    }
}

/// Closed range `[first, last]` of condition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityInterval {
    pub first: CondTime,
    pub last: CondTime,
}

impl ValidityInterval {
    pub fn contains(&self, time: CondTime) -> bool {
        self.first <= time && time <= self.last
    }

    pub fn is_open(&self) -> bool {
        self.last == TIME_LIMIT
    }
}

impl fmt::Display for ValidityInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open() {
            write!(f, "[{}, inf)", self.first)
        } else {
            write!(f, "[{}, {}]", self.first, self.last)
        }
    }
}

/// Position of `sync` on the time axis of `time_type`.
///
/// Lumi time packs the run number into the upper 32 bits.
pub fn time_of(time_type: TimeType, sync: &SyncValue) -> CondTime {
    match time_type {
        TimeType::Run => CondTime::from(sync.run),
        TimeType::Lumi => (CondTime::from(sync.run) << 32) | CondTime::from(sync.lumi),
        TimeType::Timestamp => sync.time.0,
    }
}

/// Shortest end an interval covering `sync` may have: the current run, the
/// current lumi, or the current instant.
pub fn limited_end(time_type: TimeType, sync: &SyncValue) -> CondTime {
    time_of(time_type, sync)
}

/// Last time of the `size`-wide bucket containing `time`.
///
/// For lumi time the bucket applies to the lumi number within the run.
pub fn bucket_end(time: CondTime, size: CondTime, time_type: TimeType) -> CondTime {
    if size == 0 {
        return time;
    }
    match time_type {
        TimeType::Lumi => {
            let run = time & !0xFFFF_FFFF;
            let lumi = time & 0xFFFF_FFFF;
            let end = (lumi / size + 1).saturating_mul(size) - 1;
            run | end.min(0xFFFF_FFFF)
        }
        TimeType::Run | TimeType::Timestamp => {
            (time / size + 1).saturating_mul(size).saturating_sub(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn tag(sinces: &[u64]) -> IovTag {
        IovTag {
            name: "t".into(),
            time_type: TimeType::Run,
            iovs: sinces
                .iter()
                .map(|&s| Iov {
                    since: s,
                    payload: format!("p{s}"),
                })
                .collect(),
        }
    }

    #[test]
    fn interval_ends_where_the_next_iov_starts() {
        let tag = tag(&[1, 10, 20]);
        let (iv, payload) = tag.interval_for(12).unwrap();
        assert_eq!(iv, ValidityInterval { first: 10, last: 19 });
        assert_eq!(payload, "p10");

        let (iv, _) = tag.interval_for(25).unwrap();
        assert!(iv.is_open());
        assert!(tag.interval_for(0).is_none());
    }

    #[test]
    fn lumi_time_packs_run_and_lumi() {
        let sync = SyncValue::new(3, 7, Timestamp(0));
        assert_eq!(time_of(TimeType::Lumi, &sync), (3 << 32) | 7);
        assert_eq!(time_of(TimeType::Run, &sync), 3);
    }

    #[test]
    fn bucket_end_rounds_up_to_the_bucket_boundary() {
        assert_eq!(bucket_end(12, 10, TimeType::Run), 19);
        assert_eq!(bucket_end(20, 10, TimeType::Run), 29);
        let lumi_time = (5 << 32) | 3;
        assert_eq!(bucket_end(lumi_time, 4, TimeType::Lumi), (5 << 32) | 3);
        assert_eq!(bucket_end(lumi_time + 1, 4, TimeType::Lumi), (5 << 32) | 7);
    }
}
