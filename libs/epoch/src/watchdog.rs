//! Transition watchdog
//!
//! One thread per running transition, parked on a cancel channel with a
//! timeout. Dropping or cancelling the [`WatchdogHandle`] wakes the thread
//! and it exits; if the timeout elapses first the `on_timeout` callback runs.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, trace};
use types::TransitionId;

/// Cancels the watchdog when dropped
#[derive(Debug)]
pub struct WatchdogHandle {
    id: TransitionId,
    cancel: Sender<()>,
}

impl WatchdogHandle {
    pub fn transition(&self) -> TransitionId {
        self.id
    }

    pub fn cancel(self) {
        // Receiver already gone means the watchdog fired or exited
        let _ = self.cancel.send(());
    }
}

/// Armed but not yet running watchdog.
///
/// Created under the coordinator lock (no I/O), started after it is released.
#[derive(Debug)]
pub struct Watchdog {
    id: TransitionId,
    timeout: Duration,
    cancelled: Receiver<()>,
}

impl Watchdog {
    pub fn arm(id: TransitionId, timeout: Duration) -> (Self, WatchdogHandle) {
        let (cancel, cancelled) = bounded(1);
        (
            Self {
                id,
                timeout,
                cancelled,
            },
            WatchdogHandle { id, cancel },
        )
    }

    /// Spawn the watchdog thread. `on_timeout` receives the elapsed time.
    pub fn start<F>(self, on_timeout: F)
    where
        F: FnOnce(TransitionId, Duration) + Send + 'static,
    {
        let id = self.id;
        let spawned = thread::Builder::new()
            .name(format!("epoch-watchdog-{}", id.inner()))
            .spawn(move || {
                let started = Instant::now();
                match self.cancelled.recv_timeout(self.timeout) {
                    Err(RecvTimeoutError::Timeout) => on_timeout(self.id, started.elapsed()),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        trace!(transition = %self.id, "Watchdog cancelled");
                    }
                }
            });

        if let Err(e) = spawned {
            error!(
                transition = %id,
                "Failed to spawn watchdog thread; transition has no timeout: {}", e
            );
        }
    }
}
