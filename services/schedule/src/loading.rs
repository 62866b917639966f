//! Load results shared by the entity caches

use crate::entity_store::StoreError;
use epoch::PendingLookup;
use thiserror::Error;
use types::{CacheGeneration, CacheKind, Epoch};

/// Loads retried when the epoch moves while fetching
pub const MAX_LOAD_ATTEMPTS: usize = 3;

/// Contents of a cache after a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub epoch: Epoch,
    pub generation: CacheGeneration,
    pub entries: usize,
}

/// Answer to `load_for_current_epoch`
#[derive(Debug)]
pub enum LoadStatus {
    /// Cache holds the current epoch
    Ready(Loaded),
    /// A transition is running; the load replays when it completes
    Deferred(PendingLookup),
}

impl LoadStatus {
    pub fn is_deferred(&self) -> bool {
        matches!(self, LoadStatus::Deferred(_))
    }

    pub fn ready(self) -> Option<Loaded> {
        match self {
            LoadStatus::Ready(loaded) => Some(loaded),
            LoadStatus::Deferred(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("epoch kept moving while loading {cache}; gave up after {attempts} attempts")]
    Contended { cache: CacheKind, attempts: usize },
}
