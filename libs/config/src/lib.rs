//! # Lineup Pointer Configuration
//!
//! Settings loading and configuration-key resolution for the Lineup cache
//! subsystem.
//!
//! ## Features
//!
//! - **Settings**: TOML files, per-environment overrides, `LINEUP_` env vars
//! - **Snapshot**: parser for the `scope::key::value` pointer snapshot
//! - **Resolver**: memory -> snapshot -> default fallback chain with
//!   locale-qualified keys and source-change invalidation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pointer_config::{load_settings, ConfigResolver};
//!
//! let settings = load_settings(None, None).expect("settings");
//! let resolver = ConfigResolver::new(settings);
//! let year = resolver.resolve_event_year();
//! let artists = resolver.resolve(pointer_config::keys::ARTIST_URL);
//! println!("{} -> {}", year, artists);
//! ```

pub mod error;
pub mod fetch;
pub mod keys;
pub mod locale;
pub mod persist;
pub mod resolver;
pub mod settings;
pub mod snapshot;

// Re-export commonly used types
pub use error::ResolveError;
pub use fetch::{RefreshOutcome, SnapshotFetcher};
pub use persist::{CachedYearFile, SourceTracker};
pub use resolver::{selection_scope, ConfigResolver, PointerStore, ScopedKey, SourceCheck};
pub use settings::{load_settings, FestivalSettings, DEFAULT_SETTINGS_PATH};
pub use snapshot::{parse_snapshot, ParsedSnapshot, SnapshotRecord};
