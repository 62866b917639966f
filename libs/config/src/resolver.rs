//! # Configuration Resolver
//!
//! Resolves named configuration keys through a fallback chain:
//!
//! ```text
//! resolve(key)
//!   ├─ source check (clear everything if the pointer source changed)
//!   ├─ locale-qualify reportUrl -> reportUrl-<lang>
//!   ├─ pointer store: (active scope, key) then (Default, key)
//!   ├─ snapshot file: parse active/Default/Current + essential keys, fill store, retry
//!   ├─ eventYear ladder: explicit year -> Current -> Default -> cached-year file -> wall clock
//!   └─ hard default from settings (empty string when none)
//! ```
//!
//! Resolution never fails and never touches the network. The only network
//! path is [`ConfigResolver::refresh_snapshot`], which callers trigger
//! explicitly.
//!
//! ## Locking
//!
//! Every field behind a lock is touched on its own: the resolver never holds
//! one guard while taking another, and never performs file I/O under a guard.

use crate::error::ResolveError;
use crate::fetch::{RefreshOutcome, SnapshotFetcher};
use crate::keys::{self, DEFAULT_LANGUAGE, EVENT_YEAR};
use crate::locale;
use crate::persist::{file_checksum, write_atomic, CachedYearFile, SourceTracker};
use crate::settings::FestivalSettings;
use crate::snapshot::{parse_snapshot, read_snapshot};
use cache::{CacheInvalidation, KeyValueCacheStore};
use chrono::Datelike;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::{CacheGeneration, Epoch, Scope};

/// Pointer store key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    pub scope: Scope,
    pub key: String,
}

impl ScopedKey {
    pub fn new(scope: Scope, key: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
        }
    }
}

/// Snapshot fills retried when an invalidation lands mid-fill
const MAX_FILL_ATTEMPTS: usize = 3;

/// Pointer data cache: `(scope, key) -> value`
pub type PointerStore = KeyValueCacheStore<ScopedKey, String>;

/// Result of comparing the desired source with the last-used one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCheck {
    Unchanged,
    /// No dataset has been produced by any source yet
    FirstUse,
    /// Source changed; every cache was invalidated before returning
    Mismatch { previous: String, current: String },
}

/// Map a user year selection to the scope it reads from
pub fn selection_scope(selection: &str) -> Scope {
    match Scope::parse(selection) {
        Scope::Label(label) => match Epoch::parse(&label) {
            Ok(epoch) => epoch.scope(),
            Err(_) => Scope::Current,
        },
        Scope::LastYear => Scope::LastYear,
        _ => Scope::Current,
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resolves configuration keys through memory, snapshot and defaults
pub struct ConfigResolver {
    settings: FestivalSettings,
    pointer: Arc<PointerStore>,
    /// `(scope, key)` pairs a snapshot fill has covered, with the pointer
    /// generation the fill was written at; older generations do not count
    filled: Mutex<HashMap<ScopedKey, CacheGeneration>>,
    selection: RwLock<Scope>,
    desired_source: RwLock<String>,
    last_source: RwLock<Option<String>>,
    language: &'static str,
    year_file: CachedYearFile,
    sources: SourceTracker,
    invalidation_targets: RwLock<Vec<Arc<dyn CacheInvalidation>>>,
    refresh_in_flight: AtomicBool,
}

impl ConfigResolver {
    pub fn new(settings: FestivalSettings) -> Self {
        let sources = SourceTracker::new(
            settings.last_source_path(),
            settings.force_refresh_path(),
            settings.dataset_dir(),
        );
        let last_source = sources.last_source();
        let language = locale::detect_language(settings.locale.as_deref());
        let selection = selection_scope(&settings.user_year);

        info!(
            scope = %selection,
            language,
            source = %settings.pointer_url,
            "Config resolver initialised"
        );

        Self {
            year_file: CachedYearFile::new(settings.year_file_path()),
            desired_source: RwLock::new(settings.pointer_url.clone()),
            pointer: Arc::new(KeyValueCacheStore::new("pointer")),
            filled: Mutex::new(HashMap::new()),
            selection: RwLock::new(selection),
            last_source: RwLock::new(last_source),
            language,
            sources,
            invalidation_targets: RwLock::new(Vec::new()),
            refresh_in_flight: AtomicBool::new(false),
            settings,
        }
    }

    pub fn settings(&self) -> &FestivalSettings {
        &self.settings
    }

    pub fn pointer_store(&self) -> Arc<PointerStore> {
        Arc::clone(&self.pointer)
    }

    pub fn language(&self) -> &'static str {
        self.language
    }

    pub fn year_file(&self) -> &CachedYearFile {
        &self.year_file
    }

    /// Scope non-eventYear keys are read from
    pub fn active_scope(&self) -> Scope {
        self.selection.read().clone()
    }

    pub fn set_active_scope(&self, scope: Scope) {
        debug!(scope = %scope, "Active scope changed");
        *self.selection.write() = scope;
    }

    /// Apply a user year selection (`Current` or a year label)
    pub fn select_year(&self, selection: &str) -> Scope {
        let scope = selection_scope(selection);
        self.set_active_scope(scope.clone());
        scope
    }

    pub fn pointer_url(&self) -> String {
        self.desired_source.read().clone()
    }

    /// Point at a different pointer source; takes effect on the next resolution
    pub fn set_pointer_url(&self, url: impl Into<String>) {
        *self.desired_source.write() = url.into();
    }

    /// Add a cache that must be emptied when the source changes
    pub fn register_invalidation(&self, target: Arc<dyn CacheInvalidation>) {
        debug!(cache = target.cache_name(), "Registered invalidation target");
        self.invalidation_targets.write().push(target);
    }

    /// Resolve a key. Never fails; unresolvable keys return their default.
    pub fn resolve(&self, key: &str) -> String {
        self.check_source();

        if key == EVENT_YEAR {
            return self.resolve_event_year().to_string();
        }

        let scope = self.active_scope();

        if locale::is_localized_key(key) {
            let candidates = [
                locale::qualify(key, self.language),
                locale::qualify(key, DEFAULT_LANGUAGE),
                key.to_string(),
            ];
            for candidate in &candidates {
                if let Some(value) = self.lookup(&scope, candidate) {
                    return value;
                }
            }
        } else if let Some(value) = self.lookup(&scope, key) {
            return value;
        }

        self.default_for(key)
    }

    /// Resolve the festival year. Never returns the empty sentinel.
    pub fn resolve_event_year(&self) -> Epoch {
        let selection = self.active_scope();
        if let Some(epoch) = selection.as_epoch() {
            return epoch;
        }

        self.ensure_filled(&selection, EVENT_YEAR);
        for scope in [Scope::Current, Scope::Default] {
            if let Some(value) = self.cached(&ScopedKey::new(scope.clone(), EVENT_YEAR)) {
                match Epoch::parse(&value) {
                    Ok(epoch) => return epoch,
                    Err(e) => warn!(scope = %scope, "Ignoring snapshot eventYear: {}", e),
                }
            }
        }

        if let Some(epoch) = self.year_file.read() {
            debug!(epoch = %epoch, "eventYear from cached-year file");
            return epoch;
        }

        let year = chrono::Local::now().year();
        debug!(year, "eventYear from wall clock");
        Epoch::from_year(year)
    }

    /// Compare the desired source with the last-used one and invalidate
    /// everything on mismatch.
    pub fn check_source(&self) -> SourceCheck {
        let desired = self.desired_source.read().clone();
        let previous = self.last_source.read().clone();

        match previous {
            Some(previous) if previous == desired => SourceCheck::Unchanged,
            None => {
                debug!(source = %desired, "Recording first configuration source");
                self.remember_source(&desired);
                SourceCheck::FirstUse
            }
            Some(previous) => {
                let mismatch = ResolveError::SourceMismatch {
                    previous: previous.clone(),
                    current: desired.clone(),
                };
                warn!("{}; invalidating all caches", mismatch);

                self.invalidate_all();
                self.purge_disk_caches();
                if let Err(e) = self.sources.set_force_refresh() {
                    warn!("Failed to persist force-refresh flag: {}", e);
                }
                self.remember_source(&desired);

                SourceCheck::Mismatch {
                    previous,
                    current: desired,
                }
            }
        }
    }

    /// Download the snapshot and replace the persisted copy if it changed.
    ///
    /// Single writer: a second concurrent call fails with
    /// [`ResolveError::RefreshInProgress`].
    pub fn refresh_snapshot(
        &self,
        fetcher: &dyn SnapshotFetcher,
    ) -> Result<RefreshOutcome, ResolveError> {
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            return Err(ResolveError::RefreshInProgress);
        }
        let _guard = InFlightGuard(&self.refresh_in_flight);

        self.check_source();
        let url = self.pointer_url();
        info!(url = %url, "Refreshing pointer snapshot");

        let bytes = fetcher
            .fetch_snapshot(&url)
            .map_err(|e| ResolveError::Fetch {
                url: url.clone(),
                reason: format!("{:#}", e),
            })?;

        let parsed = parse_snapshot(&String::from_utf8_lossy(&bytes), |_, _| true);
        if parsed.records.is_empty() {
            return Err(ResolveError::EmptySnapshot { url });
        }

        let checksum = crc32fast::hash(&bytes);
        let path = self.settings.snapshot_path();
        let forced = self.sources.force_refresh_pending();

        if !forced && file_checksum(&path) == Some(checksum) {
            debug!(checksum, "Pointer snapshot unchanged");
            return Ok(RefreshOutcome::Unchanged { checksum });
        }

        write_atomic(&path, &bytes)?;
        self.invalidate_pointer_cache();

        info!(
            checksum,
            records = parsed.records.len(),
            skipped = parsed.skipped,
            forced,
            "Pointer snapshot updated"
        );
        Ok(RefreshOutcome::Updated {
            checksum,
            records: parsed.records.len(),
        })
    }

    /// Drop cached pointer values so the next resolution re-reads the snapshot
    pub fn invalidate_pointer_cache(&self) {
        self.pointer.clear();
        self.filled.lock().clear();
    }

    /// Consume the force-refresh flag left by a source mismatch
    pub fn take_force_refresh(&self) -> bool {
        self.sources.take_force_refresh()
    }

    pub fn force_refresh_pending(&self) -> bool {
        self.sources.force_refresh_pending()
    }

    fn lookup(&self, scope: &Scope, key: &str) -> Option<String> {
        self.ensure_filled(scope, key);
        self.cached(&ScopedKey::new(scope.clone(), key))
            .or_else(|| self.cached(&ScopedKey::new(Scope::Default, key)))
    }

    fn cached(&self, key: &ScopedKey) -> Option<String> {
        self.pointer.get(key).filter(|value| !value.is_empty())
    }

    fn ensure_filled(&self, scope: &Scope, key: &str) {
        let marker = ScopedKey::new(scope.clone(), key);
        if self.pointer.contains_key(&marker) {
            return;
        }
        let generation = self.pointer.generation();
        if self.filled.lock().get(&marker) == Some(&generation) {
            return;
        }
        self.fill_from_snapshot(scope, key);
    }

    /// Parse the snapshot for `scope` and populate the pointer store
    fn fill_from_snapshot(&self, scope: &Scope, key: &str) {
        let path = self.settings.snapshot_path();
        let keep = |record_scope: &Scope, record_key: &str| {
            let relevant_scope = record_scope == scope
                || *record_scope == Scope::Default
                || *record_scope == Scope::Current;
            relevant_scope && (keys::is_essential(record_key) || record_key == key)
        };

        for attempt in 1..=MAX_FILL_ATTEMPTS {
            // Read before the file so an invalidation during the read is caught
            let generation = self.pointer.generation();
            let parsed = match read_snapshot(&path, &keep) {
                Ok(parsed) => parsed,
                Err(e) if e.is_expected() => {
                    debug!("{}", e);
                    return;
                }
                Err(e) => {
                    warn!("Failed to read pointer snapshot: {}", e);
                    return;
                }
            };

            let records = parsed
                .records
                .into_iter()
                .map(|record| (ScopedKey::new(record.scope, record.key), record.value));
            let Some(written) = self.pointer.set_many_if(generation, records) else {
                debug!(attempt, scope = %scope, key, "Pointer store invalidated during fill");
                continue;
            };

            let mut filled = self.filled.lock();
            filled.insert(ScopedKey::new(scope.clone(), key), generation);
            for essential in keys::ESSENTIAL_KEYS {
                filled.insert(ScopedKey::new(scope.clone(), *essential), generation);
            }
            drop(filled);

            debug!(scope = %scope, key, written, "Filled pointer store from snapshot");
            return;
        }

        warn!(
            scope = %scope,
            key,
            attempts = MAX_FILL_ATTEMPTS,
            "Pointer store kept changing during fill; falling back"
        );
    }

    fn default_for(&self, key: &str) -> String {
        let value = self.settings.defaults.get(key).cloned().unwrap_or_default();
        debug!(key, value = %value, "Using default value");
        value
    }

    fn remember_source(&self, source: &str) {
        *self.last_source.write() = Some(source.to_string());
        if let Err(e) = self.sources.record(source) {
            warn!("Failed to persist last-used source: {}", e);
        }
    }

    fn invalidate_all(&self) {
        self.invalidate_pointer_cache();
        let targets: Vec<Arc<dyn CacheInvalidation>> =
            self.invalidation_targets.read().iter().cloned().collect();
        for target in targets {
            debug!(cache = target.cache_name(), "Invalidating cache");
            target.invalidate();
        }
    }

    fn purge_disk_caches(&self) {
        if let Err(e) = self.sources.purge_datasets() {
            warn!("Failed to delete dataset caches: {}", e);
        }
        match std::fs::remove_file(self.settings.snapshot_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete pointer snapshot: {}", e),
        }
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("scope", &self.active_scope())
            .field("language", &self.language)
            .field("pointer", &self.pointer)
            .finish()
    }
}
