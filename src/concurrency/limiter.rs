// src/concurrency/limiter.rs

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How many invocations of one module may run at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyKind {
    /// Any number of concurrent calls (thread-safe module).
    #[default]
    Global,
    /// Calls are serialized.
    One,
    /// At most `n` concurrent calls.
    Limited(usize),
}

/// Per-worker admission control built on a Tokio semaphore.
///
/// Waiting for a permit suspends the queued task rather than a pool thread.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Option<Arc<Semaphore>>,
}

impl ConcurrencyLimiter {
    pub fn new(kind: ConcurrencyKind) -> Self {
        let permits = match kind {
            ConcurrencyKind::Global => None,
            ConcurrencyKind::One => Some(1),
            ConcurrencyKind::Limited(n) => Some(n.max(1)),
        };
        Self {
            semaphore: permits.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Wait for a slot. `None` means the module is unlimited.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        }
    }

    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}
