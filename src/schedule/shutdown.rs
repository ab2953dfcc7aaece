// src/schedule/shutdown.rs

use std::sync::atomic::{AtomicU8, Ordering};

/// Why processing stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A failure asked for the job to stop.
    Failure,
    /// An external signal (Ctrl-C).
    Signal,
}

/// Cooperative cancellation flag.
///
/// It is only consulted between transitions; a running callback is never
/// interrupted. The first request's reason sticks.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    state: AtomicU8,
}

const RUNNING: u8 = 0;
const FAILURE: u8 = 1;
const SIGNAL: u8 = 2;

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call was the first request.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        let code = match reason {
            ShutdownReason::Failure => FAILURE,
            ShutdownReason::Signal => SIGNAL,
        };
        self.state
            .compare_exchange(RUNNING, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        match self.state.load(Ordering::Acquire) {
            FAILURE => Some(ShutdownReason::Failure),
            SIGNAL => Some(ShutdownReason::Signal),
            _ => None,
        }
    }
}
