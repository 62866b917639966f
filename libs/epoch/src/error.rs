//! Transition error types

use std::time::Duration;
use thiserror::Error;
use types::{EpochParseError, TransitionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EpochError {
    /// Transition target was empty or the unset sentinel; prior epoch retained
    #[error("invalid transition target '{input}': {source}")]
    InvalidEpoch {
        input: String,
        #[source]
        source: EpochParseError,
    },

    /// Watchdog forced completion of a transition that never became ready
    #[error("{id} did not complete within {elapsed:?}; forcing completion")]
    TransitionTimeout { id: TransitionId, elapsed: Duration },

    /// Call referred to a transition that was superseded or already finished
    #[error("{id} is no longer the active transition")]
    StaleTransition { id: TransitionId },
}

impl EpochError {
    /// Stale ids are routine when transitions overlap
    pub fn is_stale(&self) -> bool {
        matches!(self, EpochError::StaleTransition { .. })
    }
}
