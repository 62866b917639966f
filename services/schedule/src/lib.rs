//! # Schedule Service
//!
//! Epoch-aware band and schedule caches for one festival year at a time.
//!
//! Each cache indexes the per-epoch datasets served by an [`EntityStore`]
//! and only ever swaps in data for the epoch the [`epoch::EpochCoordinator`]
//! has committed (or the transition it is currently loading). Lookups issued
//! mid-transition are deferred and replayed against the new epoch once the
//! transition completes.
//!
//! [`FestivalRuntime`] wires the resolver, coordinator and caches together
//! and is the only place those components meet.

pub mod band_cache;
pub mod entity_store;
pub mod fetcher;
pub mod loading;
pub mod runtime;
pub mod schedule_cache;

pub use band_cache::BandCache;
pub use entity_store::{EntityStore, JsonEntityStore, MemoryEntityStore, StoreError};
pub use fetcher::{HttpSnapshotFetcher, DEFAULT_FETCH_TIMEOUT};
pub use loading::{LoadError, LoadStatus, Loaded, MAX_LOAD_ATTEMPTS};
pub use runtime::{
    FestivalRuntime, FromLookupValue, Lookup, RuntimeStatus, BANDS_FILE, SCHEDULE_FILE,
};
pub use schedule_cache::{ScheduleCache, ScheduleView};
