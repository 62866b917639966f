//! # Epoch Coordinator
//!
//! Owns the current epoch and the transition state machine:
//!
//! ```text
//! Idle/Completed ──begin──▶ InProgress ──mark_data_ready──▶ DataReady
//!                              │    ▲                           │
//!                              │    └──── begin (supersede) ────┤
//!                              │                                │ request_completion
//!                              ├──── watchdog timeout ──────────┤
//!                              └──── abort ─────────────────────┴──▶ Completed
//! ```
//!
//! Every call referring to a transition carries its [`TransitionId`]; calls
//! for a superseded or finished transition are rejected with
//! [`EpochError::StaleTransition`] and change nothing. Exactly one
//! `TransitionComplete` signal is published per id that reaches `Completed`.
//!
//! Completion runs in two phases. The state lock decides and commits; then,
//! with no lock held, the watchdog is cancelled, the signal published and the
//! deferred queue replayed through the registered [`LookupExecutor`].

use crate::bus::SignalBus;
use crate::deferred::{DeferredLookupQueue, LookupExecutor};
use crate::error::EpochError;
use crate::watchdog::{Watchdog, WatchdogHandle};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use types::{
    CompletionKind, Epoch, EpochSignal, LookupRequest, LookupResult, LookupValue, TransitionId,
    TransitionState,
};

/// Default watchdog timeout for stuck transitions
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub watchdog_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
        }
    }
}

/// Transition counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub started: u64,
    pub completed: u64,
    pub forced: u64,
    pub aborted: u64,
    pub superseded: u64,
}

#[derive(Debug)]
struct ActiveTransition {
    id: TransitionId,
    from: Epoch,
    to: Epoch,
    started: Instant,
    completion_requested: bool,
    watchdog: Option<WatchdogHandle>,
}

#[derive(Debug)]
struct CoordinatorState {
    current: Epoch,
    state: TransitionState,
    last_id: TransitionId,
    active: Option<ActiveTransition>,
    stats: CoordinatorStats,
}

/// Decided under the lock, published after it is released
struct Completion {
    id: TransitionId,
    epoch: Epoch,
    kind: CompletionKind,
    elapsed: Duration,
    watchdog: Option<WatchdogHandle>,
}

impl CoordinatorState {
    fn active_matching(&self, id: TransitionId) -> Option<&ActiveTransition> {
        self.active.as_ref().filter(|active| active.id == id)
    }

    fn commit(&mut self, kind: CompletionKind) -> Option<Completion> {
        let active = self.active.take()?;
        match kind {
            CompletionKind::Normal | CompletionKind::Forced => self.current = active.to,
            CompletionKind::Aborted => self.current = active.from,
        }
        self.state = TransitionState::Completed;

        self.stats.completed += 1;
        match kind {
            CompletionKind::Forced => self.stats.forced += 1,
            CompletionKind::Aborted => self.stats.aborted += 1,
            CompletionKind::Normal => {}
        }

        Some(Completion {
            id: active.id,
            epoch: self.current.clone(),
            kind,
            elapsed: active.started.elapsed(),
            watchdog: active.watchdog,
        })
    }
}

struct Shared {
    state: Mutex<CoordinatorState>,
    /// Mirror of the active id for lock-free `is_current` checks; 0 when idle
    active_id: AtomicU64,
    /// Bumped on every completion
    commits: AtomicU64,
    settings: CoordinatorSettings,
    bus: Arc<SignalBus>,
    queue: Arc<DeferredLookupQueue>,
    replay_target: RwLock<Option<Weak<dyn LookupExecutor>>>,
}

/// Answers replayed lookups when no executor is registered
struct UnavailableExecutor {
    epoch: Epoch,
}

impl LookupExecutor for UnavailableExecutor {
    fn execute(&self, _request: &LookupRequest) -> LookupResult {
        LookupResult::new(self.epoch.clone(), LookupValue::Unavailable)
    }
}

/// Handle to the epoch state machine. Clones share state.
#[derive(Clone)]
pub struct EpochCoordinator {
    shared: Arc<Shared>,
}

impl EpochCoordinator {
    pub fn new(
        initial: Epoch,
        settings: CoordinatorSettings,
        bus: Arc<SignalBus>,
        queue: Arc<DeferredLookupQueue>,
    ) -> Self {
        info!(
            epoch = %initial,
            watchdog = ?settings.watchdog_timeout,
            "Epoch coordinator initialised"
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState {
                    current: initial,
                    state: TransitionState::Idle,
                    last_id: TransitionId::new(0),
                    active: None,
                    stats: CoordinatorStats::default(),
                }),
                active_id: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                settings,
                bus,
                queue,
                replay_target: RwLock::new(None),
            }),
        }
    }

    /// Start switching to `to`.
    ///
    /// Any running transition is superseded: its id becomes stale, its
    /// watchdog is cancelled and it will never publish a completion. Deferred
    /// operations it captured replay when the new transition completes.
    pub fn begin_transition(&self, to: &str) -> Result<TransitionId, EpochError> {
        let target = Epoch::parse(to).map_err(|source| {
            let err = EpochError::InvalidEpoch {
                input: to.to_string(),
                source,
            };
            error!("{}; keeping current epoch", err);
            err
        })?;

        let (id, from, watchdog, superseded) = {
            let mut state = self.shared.state.lock();
            let id = state.last_id.next();
            state.last_id = id;

            let (watchdog, handle) = Watchdog::arm(id, self.shared.settings.watchdog_timeout);
            let superseded = state.active.take();
            let from = state.current.clone();

            state.active = Some(ActiveTransition {
                id,
                from: from.clone(),
                to: target.clone(),
                started: Instant::now(),
                completion_requested: false,
                watchdog: Some(handle),
            });
            state.state = TransitionState::InProgress;
            state.stats.started += 1;
            if superseded.is_some() {
                state.stats.superseded += 1;
            }
            self.shared.active_id.store(id.inner(), Ordering::SeqCst);

            (id, from, watchdog, superseded)
        };

        self.shared.queue.open(id);

        if let Some(previous) = superseded {
            info!(superseded = %previous.id, by = %id, "Transition superseded");
            if let Some(handle) = previous.watchdog {
                handle.cancel();
            }
        }

        let weak = Arc::downgrade(&self.shared);
        watchdog.start(move |id, elapsed| {
            if let Some(shared) = weak.upgrade() {
                EpochCoordinator { shared }.force_complete(id, elapsed);
            }
        });

        info!(%id, from = %from, to = %target, "Epoch transition started");
        self.shared.bus.publish(EpochSignal::TransitionStarted {
            id,
            from,
            to: target,
        });
        Ok(id)
    }

    /// Entity caches finished loading for transition `id`
    pub fn mark_data_ready(&self, id: TransitionId) -> Result<(), EpochError> {
        let completion = {
            let mut state = self.shared.state.lock();
            let requested = match state.active_matching(id) {
                Some(active) => active.completion_requested,
                None => return Err(self.stale(id)),
            };
            state.state = TransitionState::DataReady;
            if requested {
                self.commit_locked(&mut state, CompletionKind::Normal)
            } else {
                None
            }
        };

        debug!(%id, "Transition data ready");
        if let Some(completion) = completion {
            self.finish(completion);
        }
        Ok(())
    }

    /// Complete `id` now if its data is ready, otherwise as soon as it is
    pub fn request_completion(&self, id: TransitionId) -> Result<(), EpochError> {
        let completion = {
            let mut state = self.shared.state.lock();
            if state.active_matching(id).is_none() {
                return Err(self.stale(id));
            }
            if state.state == TransitionState::DataReady {
                self.commit_locked(&mut state, CompletionKind::Normal)
            } else {
                if let Some(active) = state.active.as_mut() {
                    active.completion_requested = true;
                }
                None
            }
        };

        match completion {
            Some(completion) => self.finish(completion),
            None => debug!(%id, "Completion requested before data ready"),
        }
        Ok(())
    }

    /// Abandon `id` and keep the epoch that was current before it
    pub fn abort_transition(&self, id: TransitionId) -> Result<(), EpochError> {
        let completion = {
            let mut state = self.shared.state.lock();
            if state.active_matching(id).is_none() {
                return Err(self.stale(id));
            }
            self.commit_locked(&mut state, CompletionKind::Aborted)
        };

        if let Some(completion) = completion {
            self.finish(completion);
        }
        Ok(())
    }

    /// Register the executor deferred lookups replay through
    pub fn set_replay_target(&self, target: Weak<dyn LookupExecutor>) {
        *self.shared.replay_target.write() = Some(target);
    }

    pub fn subscribe(&self) -> Receiver<EpochSignal> {
        self.shared.bus.subscribe()
    }

    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.shared.bus
    }

    pub fn queue(&self) -> &Arc<DeferredLookupQueue> {
        &self.shared.queue
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.shared.settings
    }

    /// Last committed epoch
    pub fn current_epoch(&self) -> Epoch {
        self.shared.state.lock().current.clone()
    }

    /// Epoch being switched to, if a transition is running
    pub fn target_epoch(&self) -> Option<Epoch> {
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.to.clone())
    }

    pub fn state(&self) -> TransitionState {
        self.shared.state.lock().state
    }

    pub fn active_transition(&self) -> Option<TransitionId> {
        match self.shared.active_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(TransitionId::new(id)),
        }
    }

    /// True while `id` is the running transition
    pub fn is_current(&self, id: TransitionId) -> bool {
        self.shared.active_id.load(Ordering::SeqCst) == id.inner()
    }

    /// Changes whenever a transition completes.
    ///
    /// Loaders compare it before and after fetching to detect that the epoch
    /// moved underneath them without taking the state lock.
    pub fn epoch_version(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn is_data_ready(&self) -> bool {
        self.state() == TransitionState::DataReady
    }

    pub fn is_transition_in_progress(&self) -> bool {
        self.state().is_active()
    }

    pub fn transitions_completed(&self) -> u64 {
        self.shared.state.lock().stats.completed
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.shared.state.lock().stats
    }

    fn force_complete(&self, id: TransitionId, elapsed: Duration) {
        let completion = {
            let mut state = self.shared.state.lock();
            if state.active_matching(id).is_none() {
                return;
            }
            self.commit_locked(&mut state, CompletionKind::Forced)
        };

        if let Some(completion) = completion {
            let err = EpochError::TransitionTimeout { id, elapsed };
            error!(epoch = %completion.epoch, "{}", err);
            self.finish(completion);
        }
    }

    fn commit_locked(
        &self,
        state: &mut CoordinatorState,
        kind: CompletionKind,
    ) -> Option<Completion> {
        let completion = state.commit(kind)?;
        self.shared.active_id.store(0, Ordering::SeqCst);
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Some(completion)
    }

    fn finish(&self, completion: Completion) {
        let Completion {
            id,
            epoch,
            kind,
            elapsed,
            watchdog,
        } = completion;

        if let Some(handle) = watchdog {
            handle.cancel();
        }

        match kind {
            CompletionKind::Normal => info!(%id, epoch = %epoch, ?elapsed, "Epoch transition complete"),
            CompletionKind::Forced => warn!(%id, epoch = %epoch, ?elapsed, "Epoch transition force-completed"),
            CompletionKind::Aborted => warn!(%id, epoch = %epoch, ?elapsed, "Epoch transition aborted"),
        }

        self.shared.bus.publish(EpochSignal::TransitionComplete {
            id,
            epoch: epoch.clone(),
            kind,
        });

        let target = self
            .shared
            .replay_target
            .read()
            .as_ref()
            .and_then(Weak::upgrade);
        let replayed = match target {
            Some(executor) => self.shared.queue.drain_and_replay(id, executor.as_ref()),
            None => self
                .shared
                .queue
                .drain_and_replay(id, &UnavailableExecutor { epoch }),
        };
        debug!(%id, replayed, "Deferred queue drained");
    }

    fn stale(&self, id: TransitionId) -> EpochError {
        debug!(%id, active = ?self.active_transition(), "Ignoring stale transition id");
        EpochError::StaleTransition { id }
    }
}

impl std::fmt::Debug for EpochCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochCoordinator")
            .field("current", &self.current_epoch())
            .field("state", &self.state())
            .field("active", &self.active_transition())
            .finish()
    }
}
