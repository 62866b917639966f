//! Schedule cache, indexed two ways
//!
//! `by_band` and `by_time` are separate stores swapped one after the other, so
//! a reader taking both snapshots can straddle a swap. [`ScheduleCache::consistent_view`]
//! detects that through the epoch tags and generations and retries.

use crate::entity_store::{EntityStore, StoreError};
use crate::loading::{LoadError, LoadStatus, Loaded, MAX_LOAD_ATTEMPTS};
use cache::{CacheInvalidation, KeyValueCacheStore, StoreSnapshot};
use epoch::EpochCoordinator;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use types::{
    CacheGeneration, CacheKind, Epoch, EpochSignal, LookupRequest, ScheduleEvent, TransitionId,
};

/// Snapshot attempts before a view is reported unavailable
const MAX_VIEW_ATTEMPTS: usize = 8;

/// Both schedule indexes, guaranteed to hold the same epoch
#[derive(Debug, Clone)]
pub struct ScheduleView {
    pub epoch: Epoch,
    pub by_band: StoreSnapshot<String, Vec<ScheduleEvent>>,
    pub by_time: StoreSnapshot<i64, Vec<ScheduleEvent>>,
}

impl ScheduleView {
    /// Events for `band`, earliest first
    pub fn events_for_band(&self, band: &str) -> Vec<ScheduleEvent> {
        self.by_band.entries.get(band).cloned().unwrap_or_default()
    }

    /// Events starting exactly at `start_time`
    pub fn events_at(&self, start_time: i64) -> Vec<ScheduleEvent> {
        self.by_time.get(&start_time).cloned().unwrap_or_default()
    }

    /// Distinct start times, ascending
    pub fn start_times(&self) -> Vec<i64> {
        let mut times: Vec<i64> = self.by_time.entries.keys().copied().collect();
        times.sort_unstable();
        times
    }

    pub fn event_count(&self) -> usize {
        self.by_band.entries.values().map(Vec::len).sum()
    }
}

pub struct ScheduleCache {
    by_band: KeyValueCacheStore<String, Vec<ScheduleEvent>>,
    by_time: KeyValueCacheStore<i64, Vec<ScheduleEvent>>,
    source: Arc<dyn EntityStore<ScheduleEvent>>,
    coordinator: EpochCoordinator,
}

impl ScheduleCache {
    pub fn new(source: Arc<dyn EntityStore<ScheduleEvent>>, coordinator: EpochCoordinator) -> Self {
        Self {
            by_band: KeyValueCacheStore::new("schedule-by-band"),
            by_time: KeyValueCacheStore::new("schedule-by-time"),
            source,
            coordinator,
        }
    }

    pub fn load_for_current_epoch(&self) -> Result<LoadStatus, LoadError> {
        match self.coordinator.queue().try_defer(LookupRequest::LoadSchedule) {
            Ok(pending) => {
                debug!(transition = %pending.transition(), "Schedule load deferred");
                Ok(LoadStatus::Deferred(pending))
            }
            Err(_) => self.load_now().map(LoadStatus::Ready),
        }
    }

    /// Load for the committed epoch without deferring; idempotent
    pub fn load_now(&self) -> Result<Loaded, LoadError> {
        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            let version = self.coordinator.epoch_version();
            let epoch = self.coordinator.current_epoch();

            if let Some(view) = self.consistent_view().filter(|view| view.epoch == epoch) {
                return Ok(Loaded {
                    epoch,
                    generation: view.by_band.generation,
                    entries: view.event_count(),
                });
            }

            let events = self.source.fetch_entities(&epoch)?;
            let entries = events.len();
            let coordinator = &self.coordinator;
            let swapped = self.swap_indexes(&epoch, events, || {
                coordinator.epoch_version() == version && coordinator.active_transition().is_none()
            });

            if let Some(generation) = swapped {
                return Ok(Loaded {
                    epoch,
                    generation,
                    entries,
                });
            }
            debug!(attempt, "Epoch moved during schedule load");
        }

        Err(LoadError::Contended {
            cache: CacheKind::ScheduleByBand,
            attempts: MAX_LOAD_ATTEMPTS,
        })
    }

    /// Load `epoch` for transition `id`; dropped if `id` was superseded
    pub fn load_for_transition(
        &self,
        id: TransitionId,
        epoch: &Epoch,
    ) -> Result<Option<Loaded>, StoreError> {
        let events = self.source.fetch_entities(epoch)?;
        let entries = events.len();
        let coordinator = &self.coordinator;

        match self.swap_indexes(epoch, events, || coordinator.is_current(id)) {
            Some(generation) => Ok(Some(Loaded {
                epoch: epoch.clone(),
                generation,
                entries,
            })),
            None => {
                debug!(%id, epoch = %epoch, "Superseded schedule load dropped");
                Ok(None)
            }
        }
    }

    /// Both indexes at one epoch, or `None` if not loaded or still swapping
    pub fn consistent_view(&self) -> Option<ScheduleView> {
        for _ in 0..MAX_VIEW_ATTEMPTS {
            let by_band = self.by_band.snapshot();
            let by_time = self.by_time.snapshot();

            // by_band is swapped first; a newer generation means we straddled a swap
            if self.by_band.generation() != by_band.generation {
                thread::yield_now();
                continue;
            }

            match (&by_band.epoch, &by_time.epoch) {
                (Some(a), Some(b)) if a == b => {
                    return Some(ScheduleView {
                        epoch: a.clone(),
                        by_band,
                        by_time,
                    })
                }
                (None, None) => return None,
                _ => thread::yield_now(),
            }
        }
        None
    }

    pub fn events_for_band(&self, band: &str) -> Vec<ScheduleEvent> {
        self.current_view()
            .map(|view| view.events_for_band(band))
            .unwrap_or_default()
    }

    pub fn events_at(&self, start_time: i64) -> Vec<ScheduleEvent> {
        self.current_view()
            .map(|view| view.events_at(start_time))
            .unwrap_or_default()
    }

    pub fn loaded_epoch(&self) -> Option<Epoch> {
        self.consistent_view().map(|view| view.epoch)
    }

    pub fn generation(&self) -> CacheGeneration {
        self.by_band.generation()
    }

    pub fn is_empty(&self) -> bool {
        self.by_band.is_empty() && self.by_time.is_empty()
    }

    fn current_view(&self) -> Option<ScheduleView> {
        let epoch = self.coordinator.current_epoch();
        if let Some(view) = self.consistent_view().filter(|view| view.epoch == epoch) {
            return Some(view);
        }

        match self.load_now() {
            Ok(_) => self.consistent_view().filter(|view| view.epoch == epoch),
            Err(e) => {
                warn!(epoch = %epoch, "Schedule data unavailable: {}", e);
                None
            }
        }
    }

    /// Swap `by_band` then `by_time`, each only while `still_valid` holds
    fn swap_indexes<F>(
        &self,
        epoch: &Epoch,
        events: Vec<ScheduleEvent>,
        still_valid: F,
    ) -> Option<CacheGeneration>
    where
        F: Fn() -> bool,
    {
        let (by_band, by_time) = index_events(events);
        let band_entries = by_band.len();
        let time_entries = by_time.len();

        let band_generation = self
            .by_band
            .replace_all_if(epoch.clone(), by_band, &still_valid)?;
        let time_generation = self
            .by_time
            .replace_all_if(epoch.clone(), by_time, &still_valid)?;

        info!(
            epoch = %epoch,
            bands = band_entries,
            slots = time_entries,
            "Schedule cache loaded"
        );
        let bus = self.coordinator.bus();
        bus.publish(EpochSignal::CacheReady {
            cache: CacheKind::ScheduleByBand,
            epoch: epoch.clone(),
            generation: band_generation,
        });
        bus.publish(EpochSignal::CacheReady {
            cache: CacheKind::ScheduleByTime,
            epoch: epoch.clone(),
            generation: time_generation,
        });

        Some(band_generation)
    }
}

impl CacheInvalidation for ScheduleCache {
    fn invalidate(&self) {
        self.by_band.clear();
        self.by_time.clear();
    }

    fn cache_name(&self) -> &str {
        "schedule"
    }
}

type ByBand = HashMap<String, Vec<ScheduleEvent>>;
type ByTime = HashMap<i64, Vec<ScheduleEvent>>;

/// Group events by band and by start time, each group ordered by start time
fn index_events(events: Vec<ScheduleEvent>) -> (ByBand, ByTime) {
    let mut by_band: ByBand = HashMap::new();
    let mut by_time: ByTime = HashMap::new();

    for event in events {
        by_time
            .entry(event.start_time)
            .or_default()
            .push(event.clone());
        by_band.entry(event.band.clone()).or_default().push(event);
    }

    for group in by_band.values_mut() {
        group.sort_by_key(|event| event.start_time);
    }
    for group in by_time.values_mut() {
        group.sort_by(|a, b| a.location.cmp(&b.location));
    }

    (by_band, by_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::MemoryEntityStore;
    use epoch::{CoordinatorSettings, DeferredLookupQueue, SignalBus};

    fn event(band: &str, year: i32, location: &str, start: i64) -> ScheduleEvent {
        ScheduleEvent {
            band: band.to_string(),
            epoch: Epoch::from_year(year),
            location: location.to_string(),
            day: "Day 1".to_string(),
            start_time: start,
            end_time: start + 3_600,
            event_type: "Show".to_string(),
        }
    }

    fn setup() -> (EpochCoordinator, ScheduleCache) {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(
            Epoch::from_year(2025),
            vec![
                event("Amorphis", 2025, "Pool", 2_000),
                event("Amorphis", 2025, "Theater", 1_000),
                event("Insomnium", 2025, "Lounge", 2_000),
            ],
        );
        store.insert(
            Epoch::from_year(2026),
            vec![event("Wintersun", 2026, "Pool", 5_000)],
        );

        let coordinator = EpochCoordinator::new(
            Epoch::from_year(2025),
            CoordinatorSettings::default(),
            Arc::new(SignalBus::new()),
            Arc::new(DeferredLookupQueue::new()),
        );
        let cache = ScheduleCache::new(store, coordinator.clone());
        (coordinator, cache)
    }

    #[test]
    fn test_indexes_are_ordered() {
        let (_coordinator, cache) = setup();

        let amorphis = cache.events_for_band("Amorphis");
        let starts: Vec<i64> = amorphis.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![1_000, 2_000]);

        let at_two: Vec<String> = cache
            .events_at(2_000)
            .into_iter()
            .map(|e| e.location)
            .collect();
        assert_eq!(at_two, vec!["Lounge", "Pool"]);

        let view = cache.consistent_view().unwrap();
        assert_eq!(view.start_times(), vec![1_000, 2_000]);
        assert_eq!(view.event_count(), 3);
    }

    #[test]
    fn test_load_is_idempotent() {
        let (_coordinator, cache) = setup();
        let first = cache.load_now().unwrap();
        let second = cache.load_now().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.entries, 3);
    }

    #[test]
    fn test_view_requires_matching_epochs() {
        let (coordinator, cache) = setup();
        assert!(cache.consistent_view().is_none());
        cache.load_now().unwrap();

        // Swap only one index to a different epoch
        let id = coordinator.begin_transition("2026").unwrap();
        let mut partial = HashMap::new();
        partial.insert("Wintersun".to_string(), Vec::new());
        cache
            .by_band
            .replace_all_if(Epoch::from_year(2026), partial, || coordinator.is_current(id));

        assert!(cache.consistent_view().is_none());

        cache
            .load_for_transition(id, &Epoch::from_year(2026))
            .unwrap()
            .unwrap();
        assert_eq!(
            cache.consistent_view().map(|view| view.epoch),
            Some(Epoch::from_year(2026))
        );
    }

    #[test]
    fn test_invalidate_empties_both_indexes() {
        let (_coordinator, cache) = setup();
        cache.load_now().unwrap();
        assert!(!cache.is_empty());

        cache.invalidate();
        assert!(cache.is_empty());
        assert_eq!(cache.loaded_epoch(), None);
    }
}
