//! # Lineup Cache Stores
//!
//! Concurrency-safe mapping stores used for every logical cache in the
//! subsystem (pointer data, band-by-name, schedule-by-band, schedule-by-time).
//!
//! ## Design
//!
//! - One `parking_lot::RwLock` per store instance, never held across stores
//! - The map lives behind an `Arc`, so a whole-map swap is one pointer write
//!   and readers holding a [`StoreSnapshot`] keep a consistent view
//! - Every whole-map write bumps the store's [`CacheGeneration`]
//!
//! ```rust
//! use cache::KeyValueCacheStore;
//! use std::collections::HashMap;
//!
//! let store: KeyValueCacheStore<String, u32> = KeyValueCacheStore::new("example");
//! store.set("a".to_string(), 1);
//! store.replace_all(HashMap::from([("b".to_string(), 2)]));
//! assert_eq!(store.get(&"a".to_string()), None);
//! assert_eq!(store.get(&"b".to_string()), Some(2));
//! ```
//!
//! [`CacheGeneration`]: types::CacheGeneration

pub mod invalidate;
pub mod store;

pub use invalidate::CacheInvalidation;
pub use store::{KeyValueCacheStore, StoreSnapshot};
