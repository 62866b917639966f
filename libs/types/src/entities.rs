//! Festival entities held by the per-entity caches

use crate::epoch::Epoch;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A performing band for one festival year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub epoch: Epoch,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description_url: Option<String>,
}

/// One scheduled appearance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub band: String,
    pub epoch: Epoch,
    pub location: String,
    /// Festival day label ("Day 1", "Day 2", ...)
    pub day: String,
    /// Unix seconds
    pub start_time: i64,
    /// Unix seconds
    pub end_time: i64,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

fn default_event_type() -> String {
    "Show".to_string()
}

/// Logical caches coordinated across an epoch transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKind {
    Pointer,
    Bands,
    ScheduleByBand,
    ScheduleByTime,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKind::Pointer => "pointer",
            CacheKind::Bands => "bands",
            CacheKind::ScheduleByBand => "schedule-by-band",
            CacheKind::ScheduleByTime => "schedule-by-time",
        };
        f.write_str(name)
    }
}
