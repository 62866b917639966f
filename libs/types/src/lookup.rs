//! # Deferred Lookup Values
//!
//! Lookups issued during an epoch transition are captured as data rather than
//! closures: a [`LookupRequest`] names the operation and its parameters, and
//! the replay produces a [`LookupResult`]. This keeps the deferred queue
//! inspectable in tests.

use crate::entities::{Band, ScheduleEvent};
use crate::epoch::{CacheGeneration, Epoch};
use serde::{Deserialize, Serialize};

/// Operation family of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CacheLoad,
    ConfigLookup,
    PointLookup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupRequest {
    /// Bulk load of the band cache for the current epoch
    LoadBands,
    /// Bulk load of both schedule caches for the current epoch
    LoadSchedule,
    /// Resolve a configuration key
    ConfigValue { key: String },
    /// Band record by name
    Band { name: String },
    /// Image URL for a band
    ImageUrl { name: String },
    /// All schedule events for a band
    EventsForBand { name: String },
}

impl LookupRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            LookupRequest::LoadBands | LookupRequest::LoadSchedule => OperationKind::CacheLoad,
            LookupRequest::ConfigValue { .. } => OperationKind::ConfigLookup,
            LookupRequest::Band { .. }
            | LookupRequest::ImageUrl { .. }
            | LookupRequest::EventsForBand { .. } => OperationKind::PointLookup,
        }
    }

    /// Key parameter of the request, if it has one
    pub fn key(&self) -> Option<&str> {
        match self {
            LookupRequest::LoadBands | LookupRequest::LoadSchedule => None,
            LookupRequest::ConfigValue { key } => Some(key),
            LookupRequest::Band { name }
            | LookupRequest::ImageUrl { name }
            | LookupRequest::EventsForBand { name } => Some(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupValue {
    /// A cache finished loading
    Loaded {
        generation: CacheGeneration,
        entries: usize,
    },
    Text(Option<String>),
    Band(Option<Band>),
    Events(Vec<ScheduleEvent>),
    /// Replay target was gone when the queue drained
    Unavailable,
}

/// Outcome of executing (or replaying) a lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    /// Epoch the lookup was served from
    pub epoch: Epoch,
    pub value: LookupValue,
}

impl LookupResult {
    pub fn new(epoch: Epoch, value: LookupValue) -> Self {
        Self { epoch, value }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            LookupValue::Text(text) => text.as_deref(),
            _ => None,
        }
    }
}
