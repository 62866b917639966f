//! # Epoch Identity
//!
//! An [`Epoch`] names one partition of the festival dataset (in practice a
//! four digit year). A [`Scope`] is the first field of a snapshot record and is
//! either an epoch label or one of the reserved scopes.
//!
//! [`TransitionId`] and [`CacheGeneration`] are monotonically increasing
//! counters: the first identifies an epoch transition so late callbacks can be
//! detected, the second versions a cache so straddling reads can be detected.

use crate::errors::EpochParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Active dataset partition selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Epoch(String);

impl Epoch {
    /// Validate and wrap an epoch label.
    ///
    /// Rejects the empty string and the `"0"` sentinel, which callers use for
    /// "unset" and which would otherwise corrupt every downstream scope.
    pub fn parse(input: &str) -> Result<Self, EpochParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EpochParseError::Empty);
        }
        if trimmed.chars().all(|c| c == '0') {
            return Err(EpochParseError::Sentinel {
                input: input.to_string(),
            });
        }
        if trimmed.contains("::") || trimmed.chars().any(char::is_whitespace) {
            return Err(EpochParseError::InvalidCharacters {
                input: input.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Epoch for a calendar year
    pub fn from_year(year: i32) -> Self {
        Self(year.to_string())
    }

    /// Numeric year if the label is one
    pub fn year(&self) -> Option<i32> {
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope under which this epoch's snapshot records are stored
    pub fn scope(&self) -> Scope {
        Scope::Label(self.0.clone())
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Epoch {
    type Error = EpochParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Epoch> for String {
    fn from(epoch: Epoch) -> Self {
        epoch.0
    }
}

/// Snapshot record scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Fallback applied beneath the active scope
    Default,
    /// The scope the server designates as the current festival year
    Current,
    /// Previous festival year
    LastYear,
    /// Arbitrary year label such as `2025`
    Label(String),
}

impl Scope {
    /// Parse a scope field. Reserved names are matched case-insensitively.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "default" => Scope::Default,
            "current" => Scope::Current,
            "last-year" | "lastyear" => Scope::LastYear,
            _ => Scope::Label(trimmed.to_string()),
        }
    }

    pub fn is_reserved(&self) -> bool {
        !matches!(self, Scope::Label(_))
    }

    /// Epoch named by this scope, if it is a year label
    pub fn as_epoch(&self) -> Option<Epoch> {
        match self {
            Scope::Label(label) => Epoch::parse(label).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Default => f.write_str("Default"),
            Scope::Current => f.write_str("Current"),
            Scope::LastYear => f.write_str("last-year"),
            Scope::Label(label) => f.write_str(label),
        }
    }
}

impl From<&Epoch> for Scope {
    fn from(epoch: &Epoch) -> Self {
        epoch.scope()
    }
}

/// Identity of one epoch transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(u64);

impl TransitionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn inner(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transition-{}", self.0)
    }
}

/// Version counter attached to every cache store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CacheGeneration(u64);

impl CacheGeneration {
    pub const INITIAL: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn inner(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Epoch transition state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionState {
    /// No transition has run yet
    Idle,
    /// Caches are being reloaded for the target epoch
    InProgress,
    /// Entity caches finished their initial load, completion not yet requested
    DataReady,
    /// Last transition finished (normally, forced or aborted)
    Completed,
}

impl TransitionState {
    /// True while readers must be deferred
    pub fn is_active(self) -> bool {
        matches!(self, TransitionState::InProgress | TransitionState::DataReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_rejects_sentinels() {
        assert_eq!(Epoch::parse(""), Err(EpochParseError::Empty));
        assert_eq!(Epoch::parse("   "), Err(EpochParseError::Empty));
        assert!(matches!(
            Epoch::parse("0"),
            Err(EpochParseError::Sentinel { .. })
        ));
        assert!(matches!(
            Epoch::parse("0000"),
            Err(EpochParseError::Sentinel { .. })
        ));
        assert!(matches!(
            Epoch::parse("20::25"),
            Err(EpochParseError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_epoch_parse_trims_and_reports_year() {
        let epoch = Epoch::parse(" 2026 ").unwrap();
        assert_eq!(epoch.as_str(), "2026");
        assert_eq!(epoch.year(), Some(2026));
        assert_eq!(epoch, Epoch::from_year(2026));
        assert_eq!(epoch.scope(), Scope::Label("2026".to_string()));
    }

    #[test]
    fn test_epoch_serde_validates() {
        let epoch: Epoch = serde_json::from_str("\"2024\"").unwrap();
        assert_eq!(epoch.year(), Some(2024));
        assert!(serde_json::from_str::<Epoch>("\"\"").is_err());
    }

    #[test]
    fn test_scope_parse_reserved_names() {
        assert_eq!(Scope::parse("Default"), Scope::Default);
        assert_eq!(Scope::parse("default"), Scope::Default);
        assert_eq!(Scope::parse("Current"), Scope::Current);
        assert_eq!(Scope::parse("last-year"), Scope::LastYear);
        assert_eq!(Scope::parse("2025"), Scope::Label("2025".to_string()));
        assert_eq!(Scope::Default.to_string(), "Default");
        assert_eq!(
            Scope::parse("2025").as_epoch(),
            Some(Epoch::from_year(2025))
        );
        assert_eq!(Scope::Current.as_epoch(), None);
    }

    #[test]
    fn test_counters_advance() {
        assert_eq!(TransitionId::new(4).next(), TransitionId::new(5));
        assert_eq!(CacheGeneration::INITIAL.next().inner(), 1);
        assert!(TransitionState::InProgress.is_active());
        assert!(TransitionState::DataReady.is_active());
        assert!(!TransitionState::Completed.is_active());
        assert!(!TransitionState::Idle.is_active());
    }
}
