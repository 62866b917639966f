//! Configuration keys and fixed defaults
//!
//! Key names match the records served in the pointer snapshot.

/// Festival year the dataset partition is selected by
pub const EVENT_YEAR: &str = "eventYear";

/// Band list download location
pub const ARTIST_URL: &str = "artistUrl";

/// Schedule download location
pub const SCHEDULE_URL: &str = "scheduleUrl";

/// Band description map location
pub const DESCRIPTION_MAP: &str = "descriptionMap";

/// Report URL family, always locale-qualified before lookup
pub const REPORT_URL: &str = "reportUrl";

/// Keys retained when the snapshot is parsed, regardless of the requested key
pub const ESSENTIAL_KEYS: &[&str] = &[EVENT_YEAR, ARTIST_URL, SCHEDULE_URL, DESCRIPTION_MAP];

/// User year selection meaning "whatever the server says is current"
pub const CURRENT_SELECTION: &str = "Current";

/// Pointer snapshot endpoint
pub const DEFAULT_POINTER_URL: &str = "https://festival.example.com/productionPointer.txt";

/// Watchdog timeout for stuck transitions (seconds)
pub const WATCHDOG_TIMEOUT_SECS: u64 = 45;

/// Languages with localized report URLs
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "de", "da", "fi", "fr", "es", "pt"];

/// Language used when the locale is unsupported
pub const DEFAULT_LANGUAGE: &str = "en";

/// True if `key` must be kept when parsing the snapshot.
///
/// Every `reportUrl-<lang>` variant counts as essential.
pub fn is_essential(key: &str) -> bool {
    ESSENTIAL_KEYS.contains(&key) || key.starts_with(REPORT_URL)
}
