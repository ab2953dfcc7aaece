// src/driver/stream.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::concurrency::wait_for;
use crate::conditions::ConditionSnapshot;
use crate::driver::job::JobState;
use crate::driver::source::EventDealer;
use crate::principal::{Coordinates, Principal, PrincipalSlot};
use crate::transition::{ContextId, Transition, TransitionInfo};
use crate::types::{EventId, StreamId};

/// What every stream needs to process its share of one lumi.
pub(crate) struct LumiWork {
    pub(crate) lumi: Arc<Principal>,
    pub(crate) snapshot: Arc<ConditionSnapshot>,
    pub(crate) dealer: EventDealer,
    /// Events handed to any stream so far.
    pub(crate) dealt: AtomicU64,
    /// Event number of index 0 in this lumi.
    pub(crate) first_event: u64,
}

impl LumiWork {
    fn info(&self, kind: Transition, principal: Arc<Principal>, stream: StreamId) -> TransitionInfo {
        TransitionInfo::for_stream(kind, principal, stream).with_conditions(Some(Arc::clone(&self.snapshot)))
    }
}

/// One stream's pass over a lumi: begin, its events, end, then exit the
/// lumi scope. The stream exits even when something failed, so the global
/// end is never starved.
pub(crate) async fn stream_lumi(
    job: Arc<JobState>,
    work: Arc<LumiWork>,
    stream: StreamId,
    mut slot: PrincipalSlot,
) -> (StreamId, PrincipalSlot) {
    let key = work.lumi.key();
    let coords = *work.lumi.coordinates();
    let (run, lumi) = (coords.run.unwrap_or_default(), coords.lumi.unwrap_or_default());

    let begun = job.reset_context(ContextId::Stream(stream))
        && job
            .stream(work.info(Transition::StreamBeginLumi, Arc::clone(&work.lumi), stream))
            .await;

    if begun {
        let mut taken = 0;
        while !job.stopping() && !job.stream_stopped(stream) {
            let Some(index) = work.dealer.next(stream, &mut taken) else {
                break;
            };
            work.dealt.fetch_add(1, Ordering::AcqRel);
            let id = EventId {
                run,
                lumi,
                event: work.first_event + index,
            };
            let principal = match slot.next(
                &job.products,
                Coordinates::event(id, coords.time),
                Some(Arc::clone(&work.lumi)),
            ) {
                Ok(principal) => principal,
                Err(error) => {
                    job.record_error(error);
                    break;
                }
            };
            trace!(stream = stream.0, event = %id, "event");
            let info = work.info(Transition::Event, principal, stream);
            let outcome = wait_for(|h| job.scheduler.run_stream(info, h)).await;
            job.note_event(stream, &outcome);
        }
    }

    job.stream(work.info(Transition::StreamEndLumi, Arc::clone(&work.lumi), stream))
        .await;
    slot.release();
    job.stream_exit(&key, stream);
    (stream, slot)
}
