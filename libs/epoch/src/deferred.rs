//! # Deferred Lookup Queue
//!
//! While a transition is running, lookups cannot be answered consistently:
//! some caches may already hold the new epoch, others the old one. Readers
//! hand their request to [`DeferredLookupQueue::try_defer`] instead. If the
//! queue is accepting, the request is stored as a [`DeferredOperation`] and
//! the caller gets a [`PendingLookup`] to wait on. Otherwise the request is
//! handed back and the caller runs it directly.
//!
//! The accept decision and the append happen under the same lock, so there is
//! no window between "is a transition running?" and "enqueue".
//!
//! When the transition completes the coordinator calls
//! [`DeferredLookupQueue::drain_and_replay`], which closes the queue and runs
//! every operation through a [`LookupExecutor`] in submission order.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use types::{LookupRequest, LookupResult, OperationKind, TransitionId};

/// Runs a lookup against the current caches.
///
/// Implemented by the composition root. Replay must not defer again, so
/// implementations call the direct (non-deferring) paths.
pub trait LookupExecutor: Send + Sync {
    fn execute(&self, request: &LookupRequest) -> LookupResult;
}

/// A captured lookup waiting for its transition to finish
#[derive(Debug)]
pub struct DeferredOperation {
    pub transition: TransitionId,
    pub request: LookupRequest,
    pub enqueued_at: Instant,
    reply: Sender<LookupResult>,
}

impl DeferredOperation {
    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    /// Send the result back; a caller that stopped waiting is ignored
    fn complete(self, result: LookupResult) {
        let _ = self.reply.send(result);
    }
}

/// Caller side of a deferred lookup
#[derive(Debug)]
pub struct PendingLookup {
    transition: TransitionId,
    kind: OperationKind,
    receiver: Receiver<LookupResult>,
}

impl PendingLookup {
    pub fn transition(&self) -> TransitionId {
        self.transition
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Block until the operation is replayed.
    ///
    /// `None` if the queue was dropped without replaying it.
    pub fn wait(&self) -> Option<LookupResult> {
        self.receiver.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<LookupResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Non-blocking check
    pub fn try_result(&self) -> Option<LookupResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    accepting: bool,
    /// Newest transition the queue was opened for, kept after closing
    transition: Option<TransitionId>,
    pending: VecDeque<DeferredOperation>,
}

/// FIFO of lookups captured during a transition
#[derive(Debug, Default)]
pub struct DeferredLookupQueue {
    state: Mutex<QueueState>,
}

impl DeferredLookupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting operations for `transition`.
    ///
    /// Opening for a newer transition while already open retargets the
    /// queue; operations captured so far stay queued and replay when the
    /// newer transition completes. Opening for an older id is ignored.
    pub fn open(&self, transition: TransitionId) -> bool {
        let mut state = self.state.lock();
        if state.transition.map_or(false, |latest| latest >= transition) {
            trace!(%transition, "Ignoring open for superseded transition");
            return false;
        }

        let retargeted = state.accepting;
        state.accepting = true;
        state.transition = Some(transition);
        let queued = state.pending.len();
        drop(state);

        debug!(%transition, retargeted, queued, "Deferred lookup queue open");
        true
    }

    /// Capture `request` if a transition is running, else hand it back
    pub fn try_defer(&self, request: LookupRequest) -> Result<PendingLookup, LookupRequest> {
        let mut state = self.state.lock();
        let transition = match (state.accepting, state.transition) {
            (true, Some(transition)) => transition,
            _ => return Err(request),
        };

        let (reply, receiver) = bounded(1);
        let kind = request.kind();
        trace!(%transition, ?request, "Deferring lookup");
        state.pending.push_back(DeferredOperation {
            transition,
            request,
            enqueued_at: Instant::now(),
            reply,
        });

        Ok(PendingLookup {
            transition,
            kind,
            receiver,
        })
    }

    /// Close the queue for `transition` and replay everything captured.
    ///
    /// Does nothing if the queue has since been retargeted to a newer
    /// transition; that transition's completion will drain it.
    pub fn drain_and_replay(&self, transition: TransitionId, executor: &dyn LookupExecutor) -> usize {
        let drained = {
            let mut state = self.state.lock();
            if !state.accepting || state.transition != Some(transition) {
                return 0;
            }
            state.accepting = false;
            std::mem::take(&mut state.pending)
        };

        let count = drained.len();
        let started = Instant::now();
        for operation in drained {
            let result = executor.execute(&operation.request);
            trace!(
                transition = %operation.transition,
                waited = ?operation.enqueued_at.elapsed(),
                "Replayed deferred lookup"
            );
            operation.complete(result);
        }

        if count > 0 {
            info!(%transition, count, elapsed = ?started.elapsed(), "Replayed deferred lookups");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    /// Transition the queue is (or was last) collecting for
    pub fn transition(&self) -> Option<TransitionId> {
        self.state.lock().transition
    }
}
