//! Band-by-name cache for the active epoch

use crate::entity_store::{EntityStore, StoreError};
use crate::loading::{LoadError, LoadStatus, Loaded, MAX_LOAD_ATTEMPTS};
use cache::{CacheInvalidation, KeyValueCacheStore, StoreSnapshot};
use epoch::EpochCoordinator;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::{Band, CacheGeneration, CacheKind, Epoch, EpochSignal, LookupRequest, TransitionId};

pub struct BandCache {
    bands: KeyValueCacheStore<String, Band>,
    source: Arc<dyn EntityStore<Band>>,
    coordinator: EpochCoordinator,
}

impl BandCache {
    pub fn new(source: Arc<dyn EntityStore<Band>>, coordinator: EpochCoordinator) -> Self {
        Self {
            bands: KeyValueCacheStore::new("bands"),
            source,
            coordinator,
        }
    }

    /// Load for the committed epoch, or defer while a transition runs
    pub fn load_for_current_epoch(&self) -> Result<LoadStatus, LoadError> {
        match self.coordinator.queue().try_defer(LookupRequest::LoadBands) {
            Ok(pending) => {
                debug!(transition = %pending.transition(), "Band load deferred");
                Ok(LoadStatus::Deferred(pending))
            }
            Err(_) => self.load_now().map(LoadStatus::Ready),
        }
    }

    /// Load for the committed epoch without deferring.
    ///
    /// Idempotent: a cache already holding the committed epoch is returned
    /// as is, generation unchanged.
    pub fn load_now(&self) -> Result<Loaded, LoadError> {
        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            let version = self.coordinator.epoch_version();
            let epoch = self.coordinator.current_epoch();

            let snapshot = self.bands.snapshot();
            if snapshot.epoch.as_ref() == Some(&epoch) {
                return Ok(Loaded {
                    epoch,
                    generation: snapshot.generation,
                    entries: snapshot.len(),
                });
            }

            let map = index_bands(self.source.fetch_entities(&epoch)?);
            let entries = map.len();
            let coordinator = &self.coordinator;
            let swapped = self.bands.replace_all_if(epoch.clone(), map, || {
                coordinator.epoch_version() == version && coordinator.active_transition().is_none()
            });

            if let Some(generation) = swapped {
                self.announce(&epoch, generation, entries);
                return Ok(Loaded {
                    epoch,
                    generation,
                    entries,
                });
            }
            debug!(attempt, "Epoch moved during band load");
        }

        Err(LoadError::Contended {
            cache: CacheKind::Bands,
            attempts: MAX_LOAD_ATTEMPTS,
        })
    }

    /// Load `epoch` for transition `id`; dropped if `id` was superseded
    pub fn load_for_transition(
        &self,
        id: TransitionId,
        epoch: &Epoch,
    ) -> Result<Option<Loaded>, StoreError> {
        let map = index_bands(self.source.fetch_entities(epoch)?);
        let entries = map.len();
        let coordinator = &self.coordinator;

        match self
            .bands
            .replace_all_if(epoch.clone(), map, || coordinator.is_current(id))
        {
            Some(generation) => {
                self.announce(epoch, generation, entries);
                Ok(Some(Loaded {
                    epoch: epoch.clone(),
                    generation,
                    entries,
                }))
            }
            None => {
                debug!(%id, epoch = %epoch, "Superseded band load dropped");
                Ok(None)
            }
        }
    }

    pub fn band(&self, name: &str) -> Option<Band> {
        self.current_view()?.entries.get(name).cloned()
    }

    pub fn image_url(&self, name: &str) -> Option<String> {
        self.band(name)?.image_url
    }

    pub fn description_url(&self, name: &str) -> Option<String> {
        self.band(name)?.description_url
    }

    /// Sorted band names for the committed epoch
    pub fn band_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .current_view()
            .map(|view| view.entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn loaded_epoch(&self) -> Option<Epoch> {
        self.bands.epoch()
    }

    pub fn generation(&self) -> CacheGeneration {
        self.bands.generation()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Snapshot for the committed epoch, loading it first if needed
    fn current_view(&self) -> Option<StoreSnapshot<String, Band>> {
        let epoch = self.coordinator.current_epoch();
        let snapshot = self.bands.snapshot();
        if snapshot.epoch.as_ref() == Some(&epoch) {
            return Some(snapshot);
        }

        match self.load_now() {
            Ok(_) => {
                let snapshot = self.bands.snapshot();
                (snapshot.epoch.as_ref() == Some(&epoch)).then_some(snapshot)
            }
            Err(e) => {
                warn!(epoch = %epoch, "Band data unavailable: {}", e);
                None
            }
        }
    }

    fn announce(&self, epoch: &Epoch, generation: CacheGeneration, entries: usize) {
        info!(epoch = %epoch, %generation, entries, "Band cache loaded");
        self.coordinator.bus().publish(EpochSignal::CacheReady {
            cache: CacheKind::Bands,
            epoch: epoch.clone(),
            generation,
        });
    }
}

impl CacheInvalidation for BandCache {
    fn invalidate(&self) {
        self.bands.clear();
    }

    fn cache_name(&self) -> &str {
        self.bands.name()
    }
}

/// Index by name; a later duplicate replaces an earlier one
fn index_bands(bands: Vec<Band>) -> HashMap<String, Band> {
    bands
        .into_iter()
        .map(|band| (band.name.clone(), band))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::MemoryEntityStore;
    use epoch::{CoordinatorSettings, DeferredLookupQueue, SignalBus};

    fn band(name: &str, year: i32, image: Option<&str>) -> Band {
        Band {
            name: name.to_string(),
            epoch: Epoch::from_year(year),
            country: None,
            genre: Some("Metal".to_string()),
            image_url: image.map(str::to_string),
            description_url: None,
        }
    }

    fn setup() -> (Arc<MemoryEntityStore<Band>>, EpochCoordinator, BandCache) {
        let store = Arc::new(MemoryEntityStore::new());
        store.insert(
            Epoch::from_year(2025),
            vec![
                band("Amorphis", 2025, Some("http://img/amorphis.jpg")),
                band("Insomnium", 2025, None),
            ],
        );
        store.insert(Epoch::from_year(2026), vec![band("Wintersun", 2026, None)]);

        let coordinator = EpochCoordinator::new(
            Epoch::from_year(2025),
            CoordinatorSettings::default(),
            Arc::new(SignalBus::new()),
            Arc::new(DeferredLookupQueue::new()),
        );
        let cache = BandCache::new(store.clone(), coordinator.clone());
        (store, coordinator, cache)
    }

    #[test]
    fn test_load_is_idempotent() {
        let (store, _coordinator, cache) = setup();

        let first = cache.load_for_current_epoch().unwrap().ready().unwrap();
        let second = cache.load_for_current_epoch().unwrap().ready().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.entries, 2);
        assert_eq!(store.fetch_count(), 1);
    }

    #[test]
    fn test_point_lookups_load_lazily() {
        let (_store, _coordinator, cache) = setup();
        assert!(cache.is_empty());

        assert_eq!(
            cache.image_url("Amorphis").as_deref(),
            Some("http://img/amorphis.jpg")
        );
        assert_eq!(cache.image_url("Insomnium"), None);
        assert!(cache.band("Wintersun").is_none());
        assert_eq!(cache.band_names(), vec!["Amorphis", "Insomnium"]);
    }

    #[test]
    fn test_load_deferred_during_transition() {
        let (_store, coordinator, cache) = setup();
        let id = coordinator.begin_transition("2026").unwrap();

        assert!(cache.load_for_current_epoch().unwrap().is_deferred());

        let loaded = cache
            .load_for_transition(id, &Epoch::from_year(2026))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.entries, 1);
        assert_eq!(cache.loaded_epoch(), Some(Epoch::from_year(2026)));
    }

    #[test]
    fn test_superseded_transition_load_is_dropped() {
        let (_store, coordinator, cache) = setup();
        let stale = coordinator.begin_transition("2026").unwrap();
        coordinator.begin_transition("2025").unwrap();

        let before = cache.generation();
        assert!(cache
            .load_for_transition(stale, &Epoch::from_year(2026))
            .unwrap()
            .is_none());
        assert_eq!(cache.generation(), before);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_clears_and_reload_bumps_generation() {
        let (store, _coordinator, cache) = setup();
        let loaded = cache.load_now().unwrap();

        cache.invalidate();
        assert!(cache.is_empty());
        assert_eq!(cache.loaded_epoch(), None);

        let reloaded = cache.load_now().unwrap();
        assert!(reloaded.generation > loaded.generation);
        assert_eq!(store.fetch_count(), 2);
    }

    #[test]
    fn test_missing_dataset_surfaces_store_error() {
        let (store, _coordinator, cache) = setup();
        store.remove(&Epoch::from_year(2025));
        assert!(matches!(
            cache.load_now(),
            Err(LoadError::Store(StoreError::NotFound { .. }))
        ));
        assert!(cache.band("Amorphis").is_none());
    }
}
