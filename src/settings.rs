use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::ingest::DetectorMode;

pub const CONFIG_PATH_ENV: &str = "TELEMETRY_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "telemetry-sync.json";

const SOURCE_ENV: &str = "TELEMETRY_SOURCE";
const DATABASE_ENV: &str = "TELEMETRY_DB";
const DEBOUNCE_ENV: &str = "TELEMETRY_DEBOUNCE_MS";
const MODE_ENV: &str = "TELEMETRY_MODE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub source_path: PathBuf,
    pub database_path: PathBuf,
    pub debounce_ms: u64,
    pub mode: DetectorMode,
    /// Skip re-upserting records whose values did not change.
    pub suppress_unchanged: bool,
    /// Listen for filesystem events. With this off, scans only run on start
    /// and on explicit change signals.
    pub watch_fs_events: bool,
    pub event_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("telemetry_data.txt"),
            database_path: PathBuf::from("telemetry.sqlite3"),
            debounce_ms: 100,
            mode: DetectorMode::FullRescan,
            suppress_unchanged: false,
            watch_fs_events: true,
            event_buffer: 256,
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            bail!("debounceMs must be greater than zero");
        }
        if self.event_buffer == 0 {
            bail!("eventBuffer must be greater than zero");
        }
        if self.source_path.as_os_str().is_empty() {
            bail!("sourcePath must not be empty");
        }
        Ok(())
    }

    /// Applies `TELEMETRY_*` overrides through `lookup`, which is
    /// `std::env::var` outside of tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(SOURCE_ENV) {
            self.source_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(DATABASE_ENV) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(DEBOUNCE_ENV) {
            self.debounce_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{DEBOUNCE_ENV} must be a whole number of ms, got '{raw}'"))?;
        }
        if let Some(raw) = lookup(MODE_ENV) {
            self.mode = parse_mode(&raw)?;
        }
        Ok(())
    }
}

pub fn parse_mode(raw: &str) -> Result<DetectorMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "full" | "fullrescan" | "full-rescan" | "sync" => Ok(DetectorMode::FullRescan),
        "incremental" | "incrementaltail" | "incremental-tail" | "tail" => {
            Ok(DetectorMode::IncrementalTail)
        }
        other => bail!("unknown detector mode '{other}'"),
    }
}

/// Settings backed by an optional JSON file. Changes made through
/// [`SettingsStore::update`] are written back to that file and take effect
/// the next time the watcher starts.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<SyncSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::with_overrides(path, |key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(path: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings file {}: {err}",
                    path.display()
                );
                SyncSettings::default()
            })
        } else {
            SyncSettings::default()
        };

        data.apply_overrides(lookup)?;
        data.validate()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Default location: `$TELEMETRY_SYNC_CONFIG`, else `telemetry-sync.json`
    /// in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> SyncSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: SyncSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &SyncSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
