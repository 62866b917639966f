//! # Festival Runtime
//!
//! Composition root for the cache subsystem. Owns exactly one of each
//! component and wires them together; nothing is global:
//!
//! ```text
//!                 ┌──────────────────┐
//!   lookups ────▶ │ FestivalRuntime  │ ──▶ DeferredLookupQueue (mid-transition)
//!                 └──┬──────┬─────┬──┘
//!                    │      │     │
//!          ConfigResolver  BandCache  ScheduleCache
//!                    │      │     │
//!                    └── EpochCoordinator ──▶ SignalBus ──▶ subscribers
//! ```
//!
//! The runtime is also the coordinator's replay target: deferred lookups are
//! answered through [`LookupExecutor::execute`], which only uses the direct,
//! non-deferring paths.

use crate::band_cache::BandCache;
use crate::entity_store::{EntityStore, JsonEntityStore};
use crate::loading::{LoadError, LoadStatus};
use crate::schedule_cache::ScheduleCache;
use anyhow::{anyhow, ensure, Context, Result};
use crossbeam_channel::Receiver;
use epoch::{
    CoordinatorSettings, DeferredLookupQueue, EpochCoordinator, LookupExecutor, PendingLookup,
    SignalBus,
};
use pointer_config::{ConfigResolver, FestivalSettings, RefreshOutcome, SnapshotFetcher};
use serde::Serialize;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::{
    Band, CacheGeneration, Epoch, EpochSignal, LookupRequest, LookupResult, LookupValue,
    ScheduleEvent, Scope, TransitionId, TransitionState,
};

/// Dataset file names under `<data_dir>/datasets/<epoch>/`
pub const BANDS_FILE: &str = "bands.json";
pub const SCHEDULE_FILE: &str = "schedule.json";

/// Answer to a deferral-aware lookup
#[derive(Debug)]
pub enum Lookup<T> {
    Ready(T),
    /// Issued mid-transition; answered when the transition completes
    Deferred(PendingLookup),
}

/// Extracts a typed answer from a replayed [`LookupValue`]
pub trait FromLookupValue: Sized {
    fn from_lookup_value(value: LookupValue) -> Option<Self>;
}

impl FromLookupValue for String {
    fn from_lookup_value(value: LookupValue) -> Option<Self> {
        match value {
            LookupValue::Text(text) => Some(text.unwrap_or_default()),
            _ => None,
        }
    }
}

impl FromLookupValue for Option<String> {
    fn from_lookup_value(value: LookupValue) -> Option<Self> {
        match value {
            LookupValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl FromLookupValue for Option<Band> {
    fn from_lookup_value(value: LookupValue) -> Option<Self> {
        match value {
            LookupValue::Band(band) => Some(band),
            _ => None,
        }
    }
}

impl FromLookupValue for Vec<ScheduleEvent> {
    fn from_lookup_value(value: LookupValue) -> Option<Self> {
        match value {
            LookupValue::Events(events) => Some(events),
            _ => None,
        }
    }
}

impl<T: FromLookupValue> Lookup<T> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Lookup::Deferred(_))
    }

    /// Value if it was available immediately
    pub fn ready(self) -> Option<T> {
        match self {
            Lookup::Ready(value) => Some(value),
            Lookup::Deferred(_) => None,
        }
    }

    /// Value, waiting up to `timeout` for a deferred lookup to replay
    pub fn wait(self, timeout: Duration) -> Option<T> {
        match self {
            Lookup::Ready(value) => Some(value),
            Lookup::Deferred(pending) => pending
                .wait_timeout(timeout)
                .and_then(|result| T::from_lookup_value(result.value)),
        }
    }
}

/// Point-in-time summary for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub epoch: Epoch,
    pub target: Option<Epoch>,
    pub state: TransitionState,
    pub active_transition: Option<TransitionId>,
    pub scope: String,
    pub language: String,
    pub bands_epoch: Option<Epoch>,
    pub band_generation: CacheGeneration,
    pub schedule_epoch: Option<Epoch>,
    pub schedule_generation: CacheGeneration,
    pub deferred: usize,
    pub transitions_started: u64,
    pub transitions_completed: u64,
    pub transitions_forced: u64,
    pub transitions_aborted: u64,
    pub force_refresh_pending: bool,
}

pub struct FestivalRuntime {
    resolver: Arc<ConfigResolver>,
    coordinator: EpochCoordinator,
    bands: Arc<BandCache>,
    schedule: Arc<ScheduleCache>,
    /// Serializes scope changes with transition starts. Holds the scope of
    /// the last settled epoch, which an aborted transition falls back to.
    scope_gate: Mutex<Scope>,
    replay_wait: Duration,
}

impl FestivalRuntime {
    /// Wire every component together around the resolved initial epoch
    pub fn bootstrap(
        settings: FestivalSettings,
        band_store: Arc<dyn EntityStore<Band>>,
        schedule_store: Arc<dyn EntityStore<ScheduleEvent>>,
    ) -> Result<Arc<Self>> {
        ensure!(
            settings.watchdog_timeout_secs > 0,
            "watchdog_timeout_secs must be greater than zero"
        );

        let replay_wait = settings.replay_wait();
        let coordinator_settings = CoordinatorSettings {
            watchdog_timeout: settings.watchdog_timeout(),
        };

        let resolver = Arc::new(ConfigResolver::new(settings));
        resolver.check_source();
        let initial = resolver.resolve_event_year();

        let coordinator = EpochCoordinator::new(
            initial.clone(),
            coordinator_settings,
            Arc::new(SignalBus::new()),
            Arc::new(DeferredLookupQueue::new()),
        );

        let bands = Arc::new(BandCache::new(band_store, coordinator.clone()));
        let schedule = Arc::new(ScheduleCache::new(schedule_store, coordinator.clone()));
        resolver.register_invalidation(bands.clone());
        resolver.register_invalidation(schedule.clone());

        let scope_gate = Mutex::new(resolver.active_scope());
        let runtime = Arc::new(Self {
            resolver,
            coordinator,
            bands,
            schedule,
            scope_gate,
            replay_wait,
        });
        let weak: Weak<FestivalRuntime> = Arc::downgrade(&runtime);
        let replay_target: Weak<dyn LookupExecutor> = weak;
        runtime.coordinator.set_replay_target(replay_target);

        info!(epoch = %initial, "🚀 Festival runtime ready");
        Ok(runtime)
    }

    /// Bootstrap with JSON datasets under the configured data directory
    pub fn from_settings(settings: FestivalSettings) -> Result<Arc<Self>> {
        let dataset_dir = settings.dataset_dir();
        let band_store: Arc<dyn EntityStore<Band>> =
            Arc::new(JsonEntityStore::new(&dataset_dir, BANDS_FILE));
        let schedule_store: Arc<dyn EntityStore<ScheduleEvent>> =
            Arc::new(JsonEntityStore::new(&dataset_dir, SCHEDULE_FILE));
        Self::bootstrap(settings, band_store, schedule_store)
    }

    /// Switch to an explicit epoch and reload every cache for it
    pub fn switch_epoch(&self, epoch: &str) -> Result<TransitionId> {
        let (id, target) = {
            let _gate = self.scope_gate.lock();
            let id = self.coordinator.begin_transition(epoch)?;
            let target =
                Epoch::parse(epoch).with_context(|| format!("Invalid epoch '{}'", epoch))?;
            self.resolver.set_active_scope(target.scope());
            (id, target)
        };
        self.drive(id, target)
    }

    /// Apply a user year selection (`Current` or a year) and switch to it
    pub fn select_year(&self, selection: &str) -> Result<TransitionId> {
        let (id, target) = {
            let _gate = self.scope_gate.lock();
            let previous_scope = self.resolver.active_scope();
            self.resolver.select_year(selection);
            let target = self.resolver.resolve_event_year();

            match self.coordinator.begin_transition(target.as_str()) {
                Ok(id) => (id, target),
                Err(e) => {
                    self.resolver.set_active_scope(previous_scope);
                    return Err(e.into());
                }
            }
        };
        self.drive(id, target)
    }

    /// Run the transition machinery only if the resolved year differs from
    /// the one persisted by the previous run
    pub fn startup_year_check(&self) -> Result<Option<TransitionId>> {
        let resolved = self.resolver.resolve_event_year();
        let year_file = self.resolver.year_file();
        if !year_file.differs_from(&resolved) {
            debug!(epoch = %resolved, "Event year unchanged since last run");
            return Ok(None);
        }

        info!(
            cached = ?year_file.read(),
            resolved = %resolved,
            "Event year changed; reloading caches"
        );
        let id = self.begin_in_scope(&resolved)?;
        self.drive(id, resolved).map(Some)
    }

    /// Download the snapshot and reload caches if the event year moved
    pub fn refresh(&self, fetcher: &dyn SnapshotFetcher) -> Result<RefreshOutcome> {
        let outcome = self.resolver.refresh_snapshot(fetcher)?;
        let forced = self.resolver.take_force_refresh();
        if !outcome.is_updated() && !forced {
            return Ok(outcome);
        }

        let resolved = self.resolver.resolve_event_year();
        if forced || resolved != self.coordinator.current_epoch() {
            info!(epoch = %resolved, forced, "Reloading caches after snapshot refresh");
            let id = self.begin_in_scope(&resolved)?;
            self.drive(id, resolved)?;
        }
        Ok(outcome)
    }

    pub fn config_value(&self, key: &str) -> Lookup<String> {
        self.gate(
            LookupRequest::ConfigValue {
                key: key.to_string(),
            },
            || self.resolver.resolve(key),
        )
    }

    pub fn band(&self, name: &str) -> Lookup<Option<Band>> {
        self.gate(
            LookupRequest::Band {
                name: name.to_string(),
            },
            || self.bands.band(name),
        )
    }

    pub fn image_url(&self, name: &str) -> Lookup<Option<String>> {
        self.gate(
            LookupRequest::ImageUrl {
                name: name.to_string(),
            },
            || self.bands.image_url(name),
        )
    }

    pub fn events_for_band(&self, name: &str) -> Lookup<Vec<ScheduleEvent>> {
        self.gate(
            LookupRequest::EventsForBand {
                name: name.to_string(),
            },
            || self.schedule.events_for_band(name),
        )
    }

    /// Load both entity caches for the committed epoch (deferring mid-transition)
    pub fn load_caches(&self) -> Result<(LoadStatus, LoadStatus), LoadError> {
        Ok((
            self.bands.load_for_current_epoch()?,
            self.schedule.load_for_current_epoch()?,
        ))
    }

    pub fn subscribe(&self) -> Receiver<EpochSignal> {
        self.coordinator.subscribe()
    }

    pub fn status(&self) -> RuntimeStatus {
        let stats = self.coordinator.stats();
        RuntimeStatus {
            epoch: self.coordinator.current_epoch(),
            target: self.coordinator.target_epoch(),
            state: self.coordinator.state(),
            active_transition: self.coordinator.active_transition(),
            scope: self.resolver.active_scope().to_string(),
            language: self.resolver.language().to_string(),
            bands_epoch: self.bands.loaded_epoch(),
            band_generation: self.bands.generation(),
            schedule_epoch: self.schedule.loaded_epoch(),
            schedule_generation: self.schedule.generation(),
            deferred: self.coordinator.queue().len(),
            transitions_started: stats.started,
            transitions_completed: stats.completed,
            transitions_forced: stats.forced,
            transitions_aborted: stats.aborted,
            force_refresh_pending: self.resolver.force_refresh_pending(),
        }
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn coordinator(&self) -> &EpochCoordinator {
        &self.coordinator
    }

    pub fn bands(&self) -> &Arc<BandCache> {
        &self.bands
    }

    pub fn schedule(&self) -> &Arc<ScheduleCache> {
        &self.schedule
    }

    /// How long callers should wait on a deferred lookup
    pub fn replay_wait(&self) -> Duration {
        self.replay_wait
    }

    fn gate<T, F>(&self, request: LookupRequest, direct: F) -> Lookup<T>
    where
        F: FnOnce() -> T,
    {
        match self.coordinator.queue().try_defer(request) {
            Ok(pending) => Lookup::Deferred(pending),
            Err(_) => Lookup::Ready(direct()),
        }
    }

    /// Begin a transition to `target` without touching the active scope
    fn begin_in_scope(&self, target: &Epoch) -> Result<TransitionId> {
        let _gate = self.scope_gate.lock();
        Ok(self.coordinator.begin_transition(target.as_str())?)
    }

    /// Load caches for `target`, then complete or abort transition `id`
    fn drive(&self, id: TransitionId, target: Epoch) -> Result<TransitionId> {
        match self.load_all(id, &target) {
            Ok(true) => {}
            Ok(false) => {
                info!(%id, "Transition superseded while loading");
                self.settle(id);
                return Ok(id);
            }
            Err(e) => {
                warn!(%id, epoch = %target, "Cache load failed; aborting transition: {:#}", e);
                self.abort(id);
                return Err(e.context(format!("Failed to switch to epoch {}", target)));
            }
        }

        if let Err(e) = self.coordinator.mark_data_ready(id) {
            debug!("{}", e);
        } else if let Err(e) = self.coordinator.request_completion(id) {
            debug!("{}", e);
        }
        self.settle(id);
        Ok(id)
    }

    /// Abort `id`, putting the scope back to the settled one first so
    /// lookups replayed by the abort read the epoch that stays current
    fn abort(&self, id: TransitionId) {
        let mut settled = self.scope_gate.lock();
        if !self.coordinator.is_current(id) {
            drop(settled);
            self.settle(id);
            return;
        }

        let aborted_scope = self.resolver.active_scope();
        self.resolver.set_active_scope(settled.clone());
        if let Err(e) = self.coordinator.abort_transition(id) {
            // the watchdog committed the target first; its scope stands
            debug!("{}", e);
            self.resolver.set_active_scope(aborted_scope.clone());
            *settled = aborted_scope;
            drop(settled);
            self.persist_committed_year();
        }
    }

    /// Record the scope and year of the committed epoch once no transition
    /// is running
    fn settle(&self, id: TransitionId) {
        {
            let mut settled = self.scope_gate.lock();
            if self.coordinator.active_transition().is_some() {
                debug!(%id, "Another transition is running; leaving settlement to it");
                return;
            }
            *settled = self.resolver.active_scope();
        }
        self.persist_committed_year();
    }

    fn persist_committed_year(&self) {
        let current = self.coordinator.current_epoch();
        let year_file = self.resolver.year_file();
        if !year_file.differs_from(&current) {
            return;
        }
        if let Err(e) = year_file.write(&current) {
            warn!("Failed to persist cached year: {}", e);
        }
    }

    /// Load both caches on worker threads; `false` if `id` was superseded
    fn load_all(&self, id: TransitionId, target: &Epoch) -> Result<bool> {
        let bands = Arc::clone(&self.bands);
        let band_epoch = target.clone();
        let band_loader = thread::Builder::new()
            .name("load-bands".to_string())
            .spawn(move || bands.load_for_transition(id, &band_epoch))
            .context("Failed to spawn band loader")?;

        let schedule = Arc::clone(&self.schedule);
        let schedule_epoch = target.clone();
        let schedule_loader = thread::Builder::new()
            .name("load-schedule".to_string())
            .spawn(move || schedule.load_for_transition(id, &schedule_epoch))
            .context("Failed to spawn schedule loader")?;

        let bands_result = band_loader.join();
        let schedule_result = schedule_loader.join();

        let bands_loaded = bands_result
            .map_err(|_| anyhow!("Band loader panicked"))?
            .context("Band load failed")?;
        let schedule_loaded = schedule_result
            .map_err(|_| anyhow!("Schedule loader panicked"))?
            .context("Schedule load failed")?;

        Ok(bands_loaded.is_some() && schedule_loaded.is_some())
    }
}

impl LookupExecutor for FestivalRuntime {
    fn execute(&self, request: &LookupRequest) -> LookupResult {
        let epoch = self.coordinator.current_epoch();
        let value = match request {
            LookupRequest::LoadBands => loaded_value(self.bands.load_now()),
            LookupRequest::LoadSchedule => loaded_value(self.schedule.load_now()),
            LookupRequest::ConfigValue { key } => {
                LookupValue::Text(Some(self.resolver.resolve(key)))
            }
            LookupRequest::Band { name } => LookupValue::Band(self.bands.band(name)),
            LookupRequest::ImageUrl { name } => LookupValue::Text(self.bands.image_url(name)),
            LookupRequest::EventsForBand { name } => {
                LookupValue::Events(self.schedule.events_for_band(name))
            }
        };
        LookupResult::new(epoch, value)
    }
}

fn loaded_value(result: Result<crate::loading::Loaded, LoadError>) -> LookupValue {
    match result {
        Ok(loaded) => LookupValue::Loaded {
            generation: loaded.generation,
            entries: loaded.entries,
        },
        Err(e) => {
            warn!("Deferred cache load failed: {}", e);
            LookupValue::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_value_extraction() {
        assert_eq!(
            String::from_lookup_value(LookupValue::Text(None)),
            Some(String::new())
        );
        assert_eq!(
            <Option<String>>::from_lookup_value(LookupValue::Text(None)),
            Some(None)
        );
        assert_eq!(String::from_lookup_value(LookupValue::Unavailable), None);
        assert_eq!(
            <Vec<ScheduleEvent>>::from_lookup_value(LookupValue::Events(Vec::new())),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_ready_lookup_needs_no_wait() {
        let lookup: Lookup<String> = Lookup::Ready("2025".to_string());
        assert!(!lookup.is_deferred());
        assert_eq!(lookup.wait(Duration::ZERO).as_deref(), Some("2025"));
    }
}
