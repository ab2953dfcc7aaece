// src/driver/source.rs

//! Synthetic event source: event numbers and their assignment to streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::module::builtin::SOURCE_PRODUCT;
use crate::principal::{Coordinates, DelayedReader, ProductId, ProductValue};
use crate::types::{EventAssignment, StreamId};

/// Resolves the source product of an event to its event number.
#[derive(Debug, Default)]
pub struct EventNumberReader {
    reads: AtomicU64,
}

impl EventNumberReader {
    /// Source products actually read; unread ones cost nothing.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl DelayedReader for EventNumberReader {
    fn read(&self, id: &ProductId, coords: &Coordinates) -> Option<ProductValue> {
        if id.as_str() != SOURCE_PRODUCT {
            return None;
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        coords.event.map(|e| Arc::new(e) as ProductValue)
    }
}

/// Hands the events of one lumi out to streams.
#[derive(Debug)]
pub enum EventDealer {
    /// First come, first served.
    Shared { next: AtomicU64, total: u64 },
    /// Event `k` belongs to stream `k % streams`.
    RoundRobin { total: u64, streams: u64 },
}

impl EventDealer {
    pub fn new(assignment: EventAssignment, total: u64, streams: usize) -> Self {
        match assignment {
            EventAssignment::Shared => EventDealer::Shared {
                next: AtomicU64::new(0),
                total,
            },
            EventAssignment::RoundRobin => EventDealer::RoundRobin {
                total,
                streams: streams.max(1) as u64,
            },
        }
    }

    /// Index (0-based within the lumi) of the next event for `stream`.
    ///
    /// `taken` counts the events this stream already got from the dealer.
    pub fn next(&self, stream: StreamId, taken: &mut u64) -> Option<u64> {
        let index = match self {
            EventDealer::Shared { next, total } => {
                let index = next.fetch_add(1, Ordering::AcqRel);
                (index < *total).then_some(index)
            }
            EventDealer::RoundRobin { total, streams } => {
                let index = *taken * streams + u64::from(stream.0);
                (index < *total).then_some(index)
            }
        };
        if index.is_some() {
            *taken += 1;
        }
        index
    }
}
