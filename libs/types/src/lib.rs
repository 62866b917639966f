//! # Lineup Shared Types
//!
//! Value types shared by every crate in the Lineup cache subsystem.
//!
//! ## Contents
//!
//! - **Epoch identity**: [`Epoch`], [`Scope`], [`TransitionId`], [`TransitionState`]
//! - **Cache versioning**: [`CacheGeneration`], [`CacheKind`]
//! - **Entities**: [`Band`], [`ScheduleEvent`]
//! - **Signals**: [`EpochSignal`], [`CompletionKind`]
//! - **Deferred lookups**: [`LookupRequest`], [`LookupValue`], [`LookupResult`]
//!
//! ## Usage
//!
//! ```rust
//! use types::{Epoch, Scope};
//!
//! let epoch = Epoch::parse("2025").unwrap();
//! assert_eq!(epoch.year(), Some(2025));
//! assert_eq!(Scope::parse("Default"), Scope::Default);
//! ```

pub mod entities;
pub mod epoch;
pub mod errors;
pub mod lookup;
pub mod signals;

pub use entities::{Band, CacheKind, ScheduleEvent};
pub use epoch::{CacheGeneration, Epoch, Scope, TransitionId, TransitionState};
pub use errors::EpochParseError;
pub use lookup::{LookupRequest, LookupResult, LookupValue, OperationKind};
pub use signals::{CompletionKind, EpochSignal};
