//! Per-epoch entity datasets
//!
//! Caches never read files themselves; they ask an [`EntityStore`] for the
//! full entity list of one epoch and index it.

use parking_lot::RwLock;
use pointer_config::persist::write_atomic;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use types::Epoch;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no dataset for epoch {epoch}")]
    NotFound { epoch: Epoch },

    #[error("failed to read dataset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode dataset {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode dataset {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of the entities belonging to one epoch
pub trait EntityStore<E>: Send + Sync {
    fn fetch_entities(&self, epoch: &Epoch) -> Result<Vec<E>, StoreError>;
}

/// Reads `<dataset_dir>/<epoch>/<file_name>` as a JSON array
pub struct JsonEntityStore<E> {
    dataset_dir: PathBuf,
    file_name: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> JsonEntityStore<E> {
    pub fn new(dataset_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            file_name: file_name.into(),
            _entity: PhantomData,
        }
    }

    pub fn path_for(&self, epoch: &Epoch) -> PathBuf {
        self.dataset_dir.join(epoch.as_str()).join(&self.file_name)
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }
}

impl<E: Serialize> JsonEntityStore<E> {
    /// Persist a dataset, replacing any previous one atomically
    pub fn write_entities(&self, epoch: &Epoch, entities: &[E]) -> Result<(), StoreError> {
        let path = self.path_for(epoch);
        let bytes = serde_json::to_vec_pretty(entities).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &bytes).map_err(|source| StoreError::Io { path, source })
    }
}

impl<E> EntityStore<E> for JsonEntityStore<E>
where
    E: DeserializeOwned,
{
    fn fetch_entities(&self, epoch: &Epoch) -> Result<Vec<E>, StoreError> {
        let path = self.path_for(epoch);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    epoch: epoch.clone(),
                })
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let entities: Vec<E> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
                path: path.clone(),
                source,
            })?;
        debug!(path = ?path, count = entities.len(), "Read entity dataset");
        Ok(entities)
    }
}

/// In-memory datasets, for embedding and tests
pub struct MemoryEntityStore<E> {
    datasets: RwLock<HashMap<Epoch, Vec<E>>>,
    latency: Option<Duration>,
    fetches: AtomicUsize,
}

impl<E: Clone> MemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            datasets: RwLock::new(HashMap::new()),
            latency: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Simulate a slow backend: every fetch sleeps for `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, epoch: Epoch, entities: Vec<E>) {
        self.datasets.write().insert(epoch, entities);
    }

    pub fn remove(&self, epoch: &Epoch) {
        self.datasets.write().remove(epoch);
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<E: Clone> Default for MemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EntityStore<E> for MemoryEntityStore<E>
where
    E: Clone + Send + Sync,
{
    fn fetch_entities(&self, epoch: &Epoch) -> Result<Vec<E>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        self.datasets
            .read()
            .get(epoch)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                epoch: epoch.clone(),
            })
    }
}
