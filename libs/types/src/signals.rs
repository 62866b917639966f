//! Events published on the signal bus
//!
//! Subscribers (UI layer, tests) receive these over a channel. A forced
//! completion is its own [`CompletionKind`] so consumers never have to infer
//! it from timing.

use crate::entities::CacheKind;
use crate::epoch::{CacheGeneration, Epoch, TransitionId};
use serde::{Deserialize, Serialize};

/// How a transition reached `Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    /// Data ready and completion requested
    Normal,
    /// Watchdog fired before data became ready; caches may be partial
    Forced,
    /// Transition abandoned, previous epoch retained
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochSignal {
    TransitionStarted {
        id: TransitionId,
        from: Epoch,
        to: Epoch,
    },
    TransitionComplete {
        id: TransitionId,
        epoch: Epoch,
        kind: CompletionKind,
    },
    CacheReady {
        cache: CacheKind,
        epoch: Epoch,
        generation: CacheGeneration,
    },
}

impl EpochSignal {
    /// True for the watchdog's emergency completion
    pub fn is_forced_recovery(&self) -> bool {
        matches!(
            self,
            EpochSignal::TransitionComplete {
                kind: CompletionKind::Forced,
                ..
            }
        )
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, EpochSignal::TransitionComplete { .. })
    }

    /// Transition this signal refers to, if any
    pub fn transition_id(&self) -> Option<TransitionId> {
        match self {
            EpochSignal::TransitionStarted { id, .. }
            | EpochSignal::TransitionComplete { id, .. } => Some(*id),
            EpochSignal::CacheReady { .. } => None,
        }
    }
}
