//! # Lineup Epoch Coordination
//!
//! Switching the active festival year means reloading every dependent cache.
//! This crate keeps readers consistent while that happens:
//!
//! - [`EpochCoordinator`] owns the current epoch and the transition state
//!   machine, with a watchdog that force-completes stuck transitions
//! - [`DeferredLookupQueue`] captures lookups issued mid-transition and
//!   replays them, in order, once the transition completes
//! - [`SignalBus`] fans transition and cache signals out to subscribers
//!
//! ## Usage
//!
//! ```rust
//! use epoch::{CoordinatorSettings, DeferredLookupQueue, EpochCoordinator, SignalBus};
//! use std::sync::Arc;
//! use types::Epoch;
//!
//! let coordinator = EpochCoordinator::new(
//!     Epoch::from_year(2025),
//!     CoordinatorSettings::default(),
//!     Arc::new(SignalBus::new()),
//!     Arc::new(DeferredLookupQueue::new()),
//! );
//!
//! let id = coordinator.begin_transition("2026").unwrap();
//! // ... reload caches for 2026 ...
//! coordinator.mark_data_ready(id).unwrap();
//! coordinator.request_completion(id).unwrap();
//! assert_eq!(coordinator.current_epoch(), Epoch::from_year(2026));
//! ```

pub mod bus;
pub mod coordinator;
pub mod deferred;
pub mod error;
pub mod watchdog;

pub use bus::SignalBus;
pub use coordinator::{
    CoordinatorSettings, CoordinatorStats, EpochCoordinator, DEFAULT_WATCHDOG_TIMEOUT,
};
pub use deferred::{DeferredLookupQueue, DeferredOperation, LookupExecutor, PendingLookup};
pub use error::EpochError;
