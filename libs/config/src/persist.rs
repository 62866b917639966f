//! Small on-disk state files: cached year, last-used source, force-refresh flag
//!
//! Every write goes through [`write_atomic`] so readers never see a torn file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use types::Epoch;

/// Write `contents` to `path` via a temp file in the same directory + rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a small text file; `None` when absent or unreadable
fn read_trimmed(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            None
        }
    }
}

/// CRC32 of a file's bytes, `None` when absent
pub fn file_checksum(path: &Path) -> Option<u32> {
    fs::read(path).ok().map(|bytes| crc32fast::hash(&bytes))
}

/// Last resolved epoch, persisted as a decimal string
#[derive(Debug, Clone)]
pub struct CachedYearFile {
    path: PathBuf,
}

impl CachedYearFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted epoch; invalid contents are treated as absent
    pub fn read(&self) -> Option<Epoch> {
        let text = read_trimmed(&self.path)?;
        match Epoch::parse(&text) {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                warn!("Ignoring cached year file contents '{}': {}", text, e);
                None
            }
        }
    }

    pub fn write(&self, epoch: &Epoch) -> std::io::Result<()> {
        write_atomic(&self.path, epoch.as_str().as_bytes())?;
        debug!(epoch = %epoch, path = ?self.path, "Persisted cached year");
        Ok(())
    }

    /// True if `epoch` differs from the persisted one (or nothing is persisted)
    pub fn differs_from(&self, epoch: &Epoch) -> bool {
        self.read().as_ref() != Some(epoch)
    }
}

/// Tracks which upstream source produced the on-disk datasets
#[derive(Debug, Clone)]
pub struct SourceTracker {
    last_source_path: PathBuf,
    force_refresh_path: PathBuf,
    dataset_dir: PathBuf,
}

impl SourceTracker {
    pub fn new(
        last_source_path: impl Into<PathBuf>,
        force_refresh_path: impl Into<PathBuf>,
        dataset_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            last_source_path: last_source_path.into(),
            force_refresh_path: force_refresh_path.into(),
            dataset_dir: dataset_dir.into(),
        }
    }

    pub fn last_source(&self) -> Option<String> {
        read_trimmed(&self.last_source_path)
    }

    pub fn record(&self, source: &str) -> std::io::Result<()> {
        write_atomic(&self.last_source_path, source.as_bytes())
    }

    /// Delete every downloaded dataset; the directory is recreated empty
    pub fn purge_datasets(&self) -> std::io::Result<()> {
        match fs::remove_dir_all(&self.dataset_dir) {
            Ok(()) => info!("Deleted dataset caches at {:?}", self.dataset_dir),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.dataset_dir)
    }

    pub fn set_force_refresh(&self) -> std::io::Result<()> {
        write_atomic(&self.force_refresh_path, b"1")
    }

    pub fn force_refresh_pending(&self) -> bool {
        self.force_refresh_path.exists()
    }

    /// Consume the flag, returning whether it was set
    pub fn take_force_refresh(&self) -> bool {
        match fs::remove_file(&self.force_refresh_path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to clear force-refresh flag: {}", e);
                true
            }
        }
    }
}
