//! Settings Module
//!
//! Provides settings loading for the Lineup cache subsystem.
//! Supports loading from TOML files with environment-specific overrides
//! and `LINEUP_`-prefixed environment variables.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::keys;

/// Default settings file, relative to the working directory
pub const DEFAULT_SETTINGS_PATH: &str = "config/lineup.toml";

/// Subsystem settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FestivalSettings {
    /// Directory holding the snapshot, cached-year file and datasets
    pub data_dir: PathBuf,

    /// Pointer snapshot file name inside `data_dir`
    pub snapshot_file: String,

    /// Cached-year file name inside `data_dir`
    pub year_file: String,

    /// Endpoint the pointer snapshot is downloaded from
    pub pointer_url: String,

    /// Language override for localized keys (`de`, `fr_FR.UTF-8`, ...)
    pub locale: Option<String>,

    /// User year selection: `Current` or an explicit year label
    pub user_year: String,

    /// Watchdog timeout for stuck epoch transitions
    pub watchdog_timeout_secs: u64,

    /// How long CLI callers wait on a deferred lookup
    pub replay_wait_ms: u64,

    /// Per-key values returned when nothing else resolves
    pub defaults: HashMap<String, String>,
}

impl Default for FestivalSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            snapshot_file: "productionPointer.txt".to_string(),
            year_file: "eventYear.txt".to_string(),
            pointer_url: keys::DEFAULT_POINTER_URL.to_string(),
            locale: None,
            user_year: keys::CURRENT_SELECTION.to_string(),
            watchdog_timeout_secs: keys::WATCHDOG_TIMEOUT_SECS,
            replay_wait_ms: 5_000,
            defaults: HashMap::new(),
        }
    }
}

impl FestivalSettings {
    /// Load settings from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new(DEFAULT_SETTINGS_PATH));

        // Missing base file is fine when a path was not given explicitly
        let mut builder =
            Config::builder().add_source(File::from(base).required(base_path.is_some()));

        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment settings: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment settings not found: {:?}", env_file);
            }
        }

        // Override with environment variables (LINEUP_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("LINEUP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build settings")?;

        let settings: Self = config
            .try_deserialize()
            .context("Failed to deserialize settings")?;
        debug!(?settings, "Loaded settings");
        Ok(settings)
    }

    /// Expand `~` and environment variables in path settings
    pub fn expand_paths(&mut self) -> Result<()> {
        let raw = self.data_dir.to_string_lossy().to_string();
        let expanded = shellexpand::full(&raw).context("Failed to expand data_dir")?;
        self.data_dir = PathBuf::from(expanded.as_ref());

        let pointer = shellexpand::env(&self.pointer_url).context("Failed to expand pointer URL")?;
        self.pointer_url = pointer.to_string();

        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn year_file_path(&self) -> PathBuf {
        self.data_dir.join(&self.year_file)
    }

    /// Root of the per-epoch downloaded datasets
    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join("datasets")
    }

    pub fn last_source_path(&self) -> PathBuf {
        self.data_dir.join("last_source")
    }

    pub fn force_refresh_path(&self) -> PathBuf {
        self.data_dir.join("force_refresh")
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn replay_wait(&self) -> Duration {
        Duration::from_millis(self.replay_wait_ms)
    }

    /// Settings rooted at `data_dir`, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

/// Convenience function to load settings with defaults
pub fn load_settings(path: Option<&Path>, environment: Option<&str>) -> Result<FestivalSettings> {
    let mut settings = FestivalSettings::load(path, environment)?;
    settings.expand_paths()?;
    Ok(settings)
}
