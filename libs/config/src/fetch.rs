//! Network seam for the explicit snapshot refresh path

/// Downloads the raw pointer snapshot
///
/// Only `ConfigResolver::refresh_snapshot` calls this; resolution itself
/// never touches the network.
pub trait SnapshotFetcher: Send + Sync {
    fn fetch_snapshot(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Outcome of a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Downloaded bytes matched the persisted snapshot checksum
    Unchanged { checksum: u32 },
    /// Snapshot replaced and pointer cache cleared
    Updated { checksum: u32, records: usize },
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated { .. })
    }
}
