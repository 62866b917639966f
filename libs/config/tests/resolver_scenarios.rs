//! Resolver Scenario Tests
//!
//! End-to-end resolution against a real data directory:
//! - scope fallback (active epoch -> Default)
//! - eventYear ladder down to the cached-year file
//! - source change invalidating registered caches and disk state
//! - refresh change detection and single-writer guard
//! - resolutions racing a refresh never re-cache the replaced snapshot

use cache::{CacheInvalidation, KeyValueCacheStore};
use pointer_config::{
    keys, ConfigResolver, FestivalSettings, RefreshOutcome, ResolveError, SnapshotFetcher,
    SourceCheck,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use types::{Epoch, Scope};

const SNAPSHOT: &str = "\
Current::eventYear::2026
Default::eventYear::2020
Default::artistUrl::http://a
2025::artistUrl::http://b
Current::scheduleUrl::http://schedule-current
";

fn settings_in(dir: &Path) -> FestivalSettings {
    FestivalSettings {
        locale: Some("en".to_string()),
        ..FestivalSettings::with_data_dir(dir)
    }
}

fn write_snapshot(settings: &FestivalSettings, text: &str) {
    fs::create_dir_all(&settings.data_dir).unwrap();
    fs::write(settings.snapshot_path(), text).unwrap();
}

#[test]
fn test_active_epoch_overrides_default() {
    let dir = tempdir().unwrap();
    let settings = FestivalSettings {
        user_year: "2025".to_string(),
        ..settings_in(dir.path())
    };
    write_snapshot(&settings, SNAPSHOT);

    let resolver = ConfigResolver::new(settings);
    assert_eq!(resolver.active_scope(), Scope::Label("2025".to_string()));
    assert_eq!(resolver.resolve(keys::ARTIST_URL), "http://b");
    // 2025 has no scheduleUrl and Current is never consulted for other keys
    assert_eq!(resolver.resolve(keys::SCHEDULE_URL), "");
}

#[test]
fn test_current_event_year_from_snapshot() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, SNAPSHOT);

    let resolver = ConfigResolver::new(settings);
    assert_eq!(resolver.resolve(keys::EVENT_YEAR), "2026");
    assert_eq!(resolver.resolve(keys::SCHEDULE_URL), "http://schedule-current");
}

#[test]
fn test_default_event_year_when_current_absent() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, "Default::eventYear::2020\n");

    let resolver = ConfigResolver::new(settings);
    assert_eq!(resolver.resolve_event_year(), Epoch::from_year(2020));
}

#[test]
fn test_missing_snapshot_uses_cached_year_file() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    fs::write(settings.year_file_path(), "2024").unwrap();

    let resolver = ConfigResolver::new(settings);
    assert_eq!(resolver.resolve(keys::EVENT_YEAR), "2024");
}

#[test]
fn test_unknown_key_returns_empty_default() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, SNAPSHOT);

    let resolver = ConfigResolver::new(settings);
    assert_eq!(resolver.resolve("noSuchKey"), "");
}

#[test]
fn test_malformed_lines_do_not_block_resolution() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(
        &settings,
        "this is not a record\nCurrent::artistUrl\nCurrent::artistUrl::http://ok\n",
    );

    let resolver = ConfigResolver::new(settings);
    assert_eq!(resolver.resolve(keys::ARTIST_URL), "http://ok");
}

struct CountingCache {
    store: KeyValueCacheStore<String, String>,
    invalidations: AtomicUsize,
}

impl CacheInvalidation for CountingCache {
    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.store.clear();
    }

    fn cache_name(&self) -> &str {
        "counting"
    }
}

#[test]
fn test_source_change_invalidates_everything() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, SNAPSHOT);
    let dataset = settings.dataset_dir().join("2026");
    fs::create_dir_all(&dataset).unwrap();
    fs::write(dataset.join("bands.json"), "[]").unwrap();

    let resolver = ConfigResolver::new(settings.clone());
    let cache = Arc::new(CountingCache {
        store: KeyValueCacheStore::new("counting"),
        invalidations: AtomicUsize::new(0),
    });
    cache.store.set("Band A".to_string(), "row".to_string());
    resolver.register_invalidation(cache.clone());

    // First use records the source and leaves everything alone
    assert_eq!(resolver.resolve(keys::ARTIST_URL), "http://a");
    assert_eq!(cache.invalidations.load(Ordering::SeqCst), 0);
    assert_eq!(cache.store.len(), 1);

    resolver.set_pointer_url("https://mirror.example.com/pointer.txt");
    let check = resolver.check_source();
    assert_eq!(
        check,
        SourceCheck::Mismatch {
            previous: keys::DEFAULT_POINTER_URL.to_string(),
            current: "https://mirror.example.com/pointer.txt".to_string(),
        }
    );

    assert_eq!(cache.invalidations.load(Ordering::SeqCst), 1);
    assert!(cache.store.is_empty());
    assert!(resolver.pointer_store().is_empty());
    assert!(!dataset.exists());
    assert!(!settings.snapshot_path().exists());
    assert!(resolver.force_refresh_pending());

    // The new source is now the recorded one
    assert_eq!(resolver.check_source(), SourceCheck::Unchanged);
    assert!(resolver.take_force_refresh());
    assert!(!resolver.force_refresh_pending());
}

#[test]
fn test_source_recorded_across_restarts() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());

    let first = ConfigResolver::new(settings.clone());
    assert_eq!(first.check_source(), SourceCheck::FirstUse);
    drop(first);

    let second = ConfigResolver::new(settings.clone());
    assert_eq!(second.check_source(), SourceCheck::Unchanged);

    let moved = ConfigResolver::new(FestivalSettings {
        pointer_url: "https://other.example.com/pointer.txt".to_string(),
        ..settings
    });
    assert!(matches!(moved.check_source(), SourceCheck::Mismatch { .. }));
}

struct StaticFetcher {
    body: &'static str,
    calls: AtomicUsize,
}

impl StaticFetcher {
    fn new(body: &'static str) -> Self {
        Self {
            body,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SnapshotFetcher for StaticFetcher {
    fn fetch_snapshot(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.as_bytes().to_vec())
    }
}

#[test]
fn test_refresh_updates_only_on_changed_content() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, SNAPSHOT);
    let resolver = ConfigResolver::new(settings);

    assert_eq!(resolver.resolve(keys::EVENT_YEAR), "2026");

    let same = StaticFetcher::new(SNAPSHOT);
    assert!(matches!(
        resolver.refresh_snapshot(&same).unwrap(),
        RefreshOutcome::Unchanged { .. }
    ));

    let newer = StaticFetcher::new("Current::eventYear::2027\n");
    match resolver.refresh_snapshot(&newer).unwrap() {
        RefreshOutcome::Updated { records, .. } => assert_eq!(records, 1),
        other => panic!("Expected update, got {:?}", other),
    }
    assert_eq!(resolver.resolve(keys::EVENT_YEAR), "2027");
}

#[test]
fn test_forced_refresh_rewrites_identical_content() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let resolver = ConfigResolver::new(settings.clone());
    resolver.check_source();

    let fetcher = StaticFetcher::new(SNAPSHOT);
    assert!(resolver.refresh_snapshot(&fetcher).unwrap().is_updated());

    resolver.set_pointer_url("https://mirror.example.com/pointer.txt");
    // Mismatch purges the snapshot and sets the flag; identical bytes still count as new
    assert!(resolver.refresh_snapshot(&fetcher).unwrap().is_updated());
    assert!(settings.snapshot_path().exists());
}

struct SlowFetcher {
    started: Arc<Barrier>,
}

impl SnapshotFetcher for SlowFetcher {
    fn fetch_snapshot(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        self.started.wait();
        thread::sleep(Duration::from_millis(200));
        Ok(SNAPSHOT.as_bytes().to_vec())
    }
}

#[test]
fn test_concurrent_refresh_is_rejected() {
    let dir = tempdir().unwrap();
    let resolver = Arc::new(ConfigResolver::new(settings_in(dir.path())));
    let started = Arc::new(Barrier::new(2));

    let worker = {
        let resolver = Arc::clone(&resolver);
        let fetcher = SlowFetcher {
            started: Arc::clone(&started),
        };
        thread::spawn(move || resolver.refresh_snapshot(&fetcher))
    };

    started.wait();
    let second = resolver.refresh_snapshot(&StaticFetcher::new(SNAPSHOT));
    assert!(matches!(second, Err(ResolveError::RefreshInProgress)));

    assert!(worker.join().unwrap().unwrap().is_updated());
    // Guard released after the first refresh finished
    assert!(resolver
        .refresh_snapshot(&StaticFetcher::new(SNAPSHOT))
        .is_ok());
}

#[test]
fn test_concurrent_resolution_is_consistent() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, SNAPSHOT);
    let resolver = Arc::new(ConfigResolver::new(settings));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(resolver.resolve(keys::ARTIST_URL), "http://a");
                    assert_eq!(resolver.resolve(keys::EVENT_YEAR), "2026");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_resolution_racing_refresh_never_keeps_old_value() {
    let newer = StaticFetcher::new("Current::eventYear::2026\nDefault::artistUrl::http://new\n");

    for round in 0..200 {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        write_snapshot(&settings, SNAPSHOT);
        let resolver = Arc::new(ConfigResolver::new(settings));
        resolver.check_source();
        let start = Arc::new(Barrier::new(2));

        let reader = {
            let resolver = Arc::clone(&resolver);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                resolver.resolve(keys::ARTIST_URL)
            })
        };

        start.wait();
        assert!(resolver.refresh_snapshot(&newer).unwrap().is_updated());
        reader.join().unwrap();

        assert_eq!(
            resolver.resolve(keys::ARTIST_URL),
            "http://new",
            "stale value survived refresh in round {}",
            round
        );
    }
}

#[test]
fn test_invalidating_reader_never_restores_old_snapshot() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    write_snapshot(&settings, SNAPSHOT);
    let resolver = Arc::new(ConfigResolver::new(settings));
    resolver.check_source();
    assert_eq!(resolver.resolve(keys::ARTIST_URL), "http://a");

    let stop = Arc::new(AtomicUsize::new(0));
    let reader = {
        let resolver = Arc::clone(&resolver);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while stop.load(Ordering::SeqCst) == 0 {
                resolver.invalidate_pointer_cache();
                resolver.resolve(keys::ARTIST_URL);
            }
        })
    };

    thread::sleep(Duration::from_millis(20));
    let newer = StaticFetcher::new("Default::artistUrl::http://new\n");
    assert!(resolver.refresh_snapshot(&newer).unwrap().is_updated());
    stop.store(1, Ordering::SeqCst);
    reader.join().unwrap();

    assert_eq!(resolver.resolve(keys::ARTIST_URL), "http://new");
}
